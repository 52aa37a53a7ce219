//! Compiled-in plugin catalog.

pub mod ccpp;
pub mod logger;
pub mod python;
pub mod run_app;
pub mod sqlite;

pub use ccpp::CcppAnalyzer;
pub use logger::LoggerReporter;
pub use python::PythonAnalyzer;
pub use run_app::RunAppAction;
pub use sqlite::SqliteDatabase;

use super::{Capability, PluginDescriptor, PluginInstance};

const CONTACT: &str = "crashvault maintainers";
const HOMEPAGE: &str = "https://github.com/crashvault/crashvault";

fn describe(
    capability: Capability,
    name: &str,
    description: &str,
    factory: impl Fn() -> PluginInstance + Send + Sync + 'static,
) -> PluginDescriptor {
    let mut descriptor =
        PluginDescriptor::new(capability, name, factory).with_description(description);
    descriptor.version = crate::version().to_string();
    descriptor.contact = CONTACT.to_string();
    descriptor.homepage = HOMEPAGE.to_string();
    descriptor
}

/// Descriptors for every plugin shipped with the crate.
pub fn builtin_descriptors() -> Vec<PluginDescriptor> {
    vec![
        describe(Capability::Analyzer, "CCpp", "Analyzes crashes in C/C++ programs", || {
            PluginInstance::Analyzer(Box::new(CcppAnalyzer::default()))
        }),
        describe(Capability::Analyzer, "Python", "Analyzes crashes in Python programs", || {
            PluginInstance::Analyzer(Box::new(PythonAnalyzer))
        }),
        describe(Capability::Reporter, "Logger", "Writes crash reports to a file", || {
            PluginInstance::Reporter(Box::new(LoggerReporter::default()))
        }),
        describe(Capability::Action, "RunApp", "Runs a command inside the dump directory", || {
            PluginInstance::Action(Box::new(RunAppAction::default()))
        }),
        describe(Capability::Database, "SQLite3", "Deduplication ledger on SQLite", || {
            PluginInstance::Database(Box::new(SqliteDatabase::default()))
        }),
    ]
}
