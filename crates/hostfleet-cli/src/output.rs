//! Result rendering

use hostfleet_core::{AggregateResult, HostLogEvent, HostSummary};
use hostfleet_exec::LogEvent;

/// Print the host inventory
pub fn print_hosts(hosts: &[HostSummary], json: bool) -> eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hosts)?);
        return Ok(());
    }

    if hosts.is_empty() {
        println!("no hosts configured");
        return Ok(());
    }
    for host in hosts {
        println!(
            "{:<20} {}@{}:{} ({:?})",
            host.name, host.user, host.address, host.port, host.transport
        );
    }
    Ok(())
}

/// Print a fan-out result
pub fn print_aggregate(result: &AggregateResult, json: bool) -> eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    for outcome in &result.results {
        if outcome.success {
            println!("[ok]     {} ({:.2?})", outcome.host, outcome.elapsed);
            for line in outcome.output.lines().filter(|l| !l.is_empty()) {
                println!("         {line}");
            }
        } else {
            let error = outcome.error.as_deref().unwrap_or("unknown error");
            println!("[failed] {} ({:.2?}): {error}", outcome.host, outcome.elapsed);
        }
    }

    let failed = result.failures().count();
    println!(
        "{}/{} hosts succeeded",
        result.results.len() - failed,
        result.results.len()
    );
    Ok(())
}

/// Print one relayed log event
pub fn print_event(event: &HostLogEvent, json: bool) -> eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match &event.event {
        LogEvent::Line(entry) if entry.is_error => eprintln!("{}: {}", event.host, entry.message),
        LogEvent::Line(entry) => println!("{}: {}", event.host, entry.message),
        LogEvent::Finished(summary) => println!("{}: -- {}", event.host, summary.message),
    }
    Ok(())
}
