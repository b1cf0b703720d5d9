//! Shared UI icons.

use console::Emoji;

// Outcome
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Progress
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[ ]");
pub static GATE: Emoji<'_, '_> = Emoji("🚦 ", "[G]");
pub static ARCHIVE: Emoji<'_, '_> = Emoji("📦 ", "[A]");
