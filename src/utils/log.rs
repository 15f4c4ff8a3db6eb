// src/utils/log.rs

//! Structured console sections on top of the `log` facade.
//!
//! Plain messages go through `log::info!` and friends directly; these helpers
//! only add the banner, step and summary framing used by the pipeline.

/// Log a banner header.
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a step in a multi-step run.
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("{}", step_line(step_num, total, message));
}

/// Log a summary section.
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {}", title);
    for (key, value) in items {
        log::info!("    {}: {}", key, value);
    }
}

fn step_line(step_num: usize, total: usize, message: &str) -> String {
    format!("[STEP {}/{}] {}", step_num, total, message)
}
