//! Reporting of module outcomes.

use async_trait::async_trait;

use crate::orchestrator::{BuildSignal, ModuleReport, RunReport};

/// Receives events during orchestration.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called when a module's orchestration begins.
    async fn on_module_start(&self, module: &str);

    /// Called when a module reaches its terminal state.
    async fn on_module_complete(&self, report: &ModuleReport);

    /// Called once after every module has finished.
    async fn on_run_complete(&self, report: &RunReport);
}

/// A reporter that does nothing (for tests or embedding).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_module_start(&self, _module: &str) {}
    async fn on_module_complete(&self, _report: &ModuleReport) {}
    async fn on_run_complete(&self, _report: &RunReport) {}
}

/// Console reporter printing one summary line per module plus run totals.
pub struct ConsoleReporter;

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_module_start(&self, module: &str) {
        println!("Running device tests for {module}");
    }

    async fn on_module_complete(&self, report: &ModuleReport) {
        let status = match report.signal {
            BuildSignal::Success => console::style("PASS ").green(),
            BuildSignal::Warning => console::style("WARN ").yellow(),
            BuildSignal::Failure => console::style("FAIL ").red(),
            BuildSignal::Abort => console::style("ABORT").red().bold(),
        };

        let attempts = match report.attempts {
            0 | 1 => String::new(),
            n => format!(" ({n} attempts)"),
        };

        match &report.detail {
            Some(detail) => println!("{status} {}{attempts}: {detail}", report.module),
            None => println!("{status} {}{attempts}", report.module),
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        let count = |signal: BuildSignal| {
            report
                .modules
                .iter()
                .filter(|m| m.signal == signal)
                .count()
        };

        println!();
        println!("Device test results:");
        println!("  Modules: {}", report.modules.len());
        println!("  Passed:  {}", console::style(count(BuildSignal::Success)).green());
        println!("  Warned:  {}", console::style(count(BuildSignal::Warning)).yellow());
        println!("  Failed:  {}", console::style(count(BuildSignal::Failure)).red());
        println!("  Aborted: {}", console::style(count(BuildSignal::Abort)).red().bold());
        println!("  Duration: {:?}", report.duration);

        println!();
        if report.success() {
            println!("{}", console::style("All modules passed.").green().bold());
        } else {
            println!("{}", console::style("Device testing failed.").red().bold());
        }
    }
}
