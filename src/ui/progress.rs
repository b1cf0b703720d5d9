use crate::manifest::{FlowState, GateResult, RoleRecord, RoleState};
use crate::orchestrator::RunObserver;
use crate::ui::icons::{CHECK, CROSS, GATE, RUNNING, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for `baton orchestrate`.
///
/// Two stacked bars: a role bar counting completed roles, and a spinner for the role
/// currently being waited on.
pub struct ConsoleObserver {
    multi: MultiProgress,
    role_bar: ProgressBar,
    wait_bar: ProgressBar,
    verbose: bool,
}

impl ConsoleObserver {
    /// `total_roles` sizes the role bar; `completed` is where it starts on a resumed run.
    pub fn new(total_roles: u64, completed: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let role_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let role_bar = multi.add(ProgressBar::new(total_roles));
        role_bar.set_style(role_style);
        role_bar.set_prefix(" Roles");
        role_bar.set_position(completed);

        let wait_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let wait_bar = multi.add(ProgressBar::new_spinner());
        wait_bar.set_style(wait_style);
        wait_bar.set_prefix("  Wait");

        Self {
            multi,
            role_bar,
            wait_bar,
            verbose,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Clear both bars. Call before printing the final summary.
    pub fn finish(&self) {
        self.wait_bar.finish_and_clear();
        self.role_bar.finish_and_clear();
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

impl RunObserver for ConsoleObserver {
    fn flow_changed(&self, run_id: &str, from: FlowState, to: FlowState) {
        if self.verbose || to.is_finished() {
            self.print_line(format!(
                "  {} {} {} {}",
                style(run_id).dim(),
                style(from).dim(),
                style("→").dim(),
                style(to).bold()
            ));
        }
    }

    fn role_started(&self, record: &RoleRecord) {
        self.role_bar
            .set_message(format!("{}", style(&record.role_id).yellow()));
        self.print_line(format!(
            "{} {} {}",
            RUNNING,
            style(&record.role_id).bold(),
            style(format!("→ {}", record.deliverable)).dim()
        ));
        self.wait_bar
            .set_message(format!("waiting on {}", style(&record.role_id).cyan()));
        self.wait_bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn role_waiting(&self, role_id: &str, elapsed: Duration) {
        self.wait_bar.set_message(format!(
            "waiting on {} {}",
            style(role_id).cyan(),
            style(format!("({})", format_elapsed(elapsed))).dim()
        ));
    }

    fn role_finished(&self, record: &RoleRecord) {
        self.wait_bar.set_message("");
        match record.state {
            RoleState::Completed => {
                self.role_bar.inc(1);
                self.print_line(format!("{} {} complete", CHECK, style(&record.role_id).green()));
            }
            RoleState::Failed => {
                let reason = record
                    .failure_reason
                    .as_ref()
                    .map(|r| r.describe())
                    .unwrap_or_default();
                self.print_line(format!(
                    "{} {} failed: {}",
                    CROSS,
                    style(&record.role_id).red().bold(),
                    reason
                ));
            }
            RoleState::Pending | RoleState::Running => {}
        }
    }

    fn gates_started(&self, count: usize) {
        self.wait_bar.disable_steady_tick();
        self.wait_bar.set_message(format!("running {} gate(s)", count));
        if count == 0 {
            self.print_line(format!("{} no gates configured", GATE));
        }
    }

    fn gate_finished(&self, result: &GateResult) {
        if result.passed {
            self.print_line(format!(
                "{} gate {} passed {}",
                GATE,
                style(&result.name).green(),
                style(format!("({}ms)", result.duration_ms)).dim()
            ));
        } else {
            self.print_line(format!(
                "{} gate {} failed",
                CROSS,
                style(&result.name).red().bold()
            ));
            if self.verbose && !result.captured_output.is_empty() {
                self.print_line(format!("{}", style(&result.captured_output).dim()));
            }
        }
    }
}

/// Final banner printed after the bars are cleared.
pub fn print_outcome_banner(run_id: &str, state: FlowState) {
    match state {
        FlowState::Completed => println!(
            "\n{} Run {} completed\n",
            SPARKLE,
            style(run_id).green().bold()
        ),
        FlowState::Failed => println!("\n{} Run {} failed\n", CROSS, style(run_id).red().bold()),
        other => println!("\n  Run {} is {}\n", style(run_id).bold(), other),
    }
}
