//! Terminal output for test runs

use colored::Colorize;
use windlass_runner::{RunAggregate, RunReport};

/// Print one suite's outcome
pub fn print_report(report: &RunReport) {
    let status = if report.success() {
        "✓ PASS".green().bold().to_string()
    } else {
        "✗ FAIL".red().bold().to_string()
    };
    println!(
        "{} {} - {} passed, {} failed ({} ms)",
        status,
        report.suite.cyan().bold(),
        report.aggregate.pass,
        report.aggregate.fail,
        report.duration_ms
    );

    for failure in &report.failures {
        println!(
            "    {} {}({}) - {}",
            "✗".red(),
            failure.method.bold(),
            failure.params,
            failure.reason.dimmed()
        );
    }
}

/// Print the session totals across all suites
pub fn print_summary(totals: &RunAggregate, suites: usize) {
    println!();
    println!("{}", " Test Results".bold());
    println!("  Suites:   {}", suites);
    println!("  Commands: {}", totals.total());
    println!("  Passed:   {}", totals.pass.to_string().green());
    if totals.fail > 0 {
        println!("  Failed:   {}", totals.fail.to_string().red().bold());
    } else {
        println!("  Failed:   {}", totals.fail);
    }
}
