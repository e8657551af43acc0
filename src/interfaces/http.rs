use std::sync::Arc;
use std::time::Duration;

pub fn build_agent(timeout: Duration) -> Result<ureq::Agent, native_tls::Error> {
    Ok(ureq::AgentBuilder::new()
        .tls_connector(Arc::new(native_tls::TlsConnector::new()?))
        .timeout(timeout)
        .build())
}
