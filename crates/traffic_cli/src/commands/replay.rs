//! Replay command implementation.

use traffic_replay::{ReplayConfig, ReplayReport, ReplayResult};

/// Runs a replay and prints its summary.
pub async fn run(config: ReplayConfig) -> ReplayResult<ReplayReport> {
    println!(
        "Replaying {} against {}:{}",
        config.path.display(),
        config.host,
        config.port
    );
    if config.fastforward > 0 {
        println!("Fast-forwarding {} ms into the recording", config.fastforward);
    }

    let report = traffic_replay::replay(config).await?;
    print_summary(&report);
    Ok(report)
}

fn print_summary(report: &ReplayReport) {
    println!();
    println!("  Records read:      {}", report.records_read);
    println!("  Dispatched:        {}", report.dispatched);
    println!("  Skipped:           {}", report.skipped);
    println!("  Responses:         {}", report.responses);
    println!("  Request errors:    {}", report.request_errors);
    println!("  Decode errors:     {}", report.decode_errors);
    println!("  Framing warnings:  {}", report.framing_warnings);
    println!("  Sessions captured: {}", report.sessions_captured);
    println!("  Max queue depth:   {}", report.max_queue_depth);
    println!("  Elapsed:           {:.2?}", report.elapsed);
    println!();
    if report.request_errors == 0 && report.is_clean() {
        println!("✓ Replay finished");
    } else {
        println!("✓ Replay finished with {} diagnostics", report.diagnostics.len());
    }
}
