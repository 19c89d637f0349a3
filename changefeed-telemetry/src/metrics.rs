use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Installs the global Prometheus recorder and serves `/metrics` on `[::]:{port}`.
///
/// Every metric carries a `service` label set to `service`. Must be called from within a
/// tokio runtime since the exporter runs as a task on it.
pub fn init_metrics(service: &str, port: u16) -> Result<(), BuildError> {
    let address = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);

    PrometheusBuilder::new()
        .with_http_listener(address)
        .add_global_label("service", service)
        .install()?;

    info!(%address, "prometheus exporter listening");

    Ok(())
}
