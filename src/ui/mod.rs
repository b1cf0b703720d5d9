pub mod icons;
pub mod progress;
pub mod report;

pub use progress::{ConsoleObserver, print_outcome_banner};
pub use report::{render_list, render_log, render_status};
