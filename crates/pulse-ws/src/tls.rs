//! TLS connector selection for upstream sources.

use crate::error::WsResult;
use tokio_tungstenite::Connector;

/// Build the connector used for `wss://` sources.
///
/// Returns `None` (the library default, verifying certificates) unless the
/// deployment asked to accept invalid certificates.
pub fn connector(accept_invalid_certs: bool) -> WsResult<Option<Connector>> {
    if !accept_invalid_certs {
        return Ok(None);
    }

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    Ok(Some(Connector::NativeTls(tls)))
}
