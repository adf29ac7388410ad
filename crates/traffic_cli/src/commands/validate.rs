//! Validate command implementation.

use traffic_replay::{ReplayConfig, ReplayResult};

/// Walks the whole log without sending anything.
///
/// Returns `Ok(false)` if any record failed to decode or was badly framed.
pub async fn run(config: ReplayConfig) -> ReplayResult<bool> {
    println!("Validating {}", config.path.display());
    println!();

    let report = traffic_replay::replay(config.with_validate(true)).await?;

    for diagnostic in &report.diagnostics {
        println!("  {diagnostic}");
    }
    println!();
    println!(
        "{} records decoded, {} decode errors, {} framing warnings",
        report.validated, report.decode_errors, report.framing_warnings
    );

    if report.is_clean() {
        println!("✓ Log validation passed");
        Ok(true)
    } else {
        println!("✗ Log validation failed");
        Ok(false)
    }
}
