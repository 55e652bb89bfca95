//! Common test utilities

use skopos::engine::AuditEngine;
use skopos::modules::ModuleRegistry;
use skopos::options::Options;
use skopos::plugins::PluginManager;
use skopos::report::ReportManager;

/// Creates test options pointing at a wiremock server
pub fn test_options(target: &str) -> Options {
    Options {
        target: target.to_string(),
        http_req_limit: 4,
        timeout_secs: 10,
        depth_limit: 2,
        link_count_limit: 50,
        user_agent: "skopos-test/0.1.0".to_string(),
        ..Options::default()
    }
}

/// Engine with a caller-supplied registry and no plugins or reports, so
/// tests observe the pipeline without side effects
pub fn bare_engine(options: Options, registry: ModuleRegistry) -> AuditEngine {
    AuditEngine::with_components(options, registry, PluginManager::new(), ReportManager::new())
        .expect("engine")
}
