use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};
use tokio_rustls::rustls::{crypto::aws_lc_rs, ClientConfig, RootCertStore};

use crate::error::StdError;

/// Type alias for the http client sinks share
pub type HttpClient =
    hyper_util::client::legacy::Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// The public web trust roots
pub fn webpki_trust() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Build a pooled http/1.1 and http/2 client over rustls.
///
/// `tls_trust` supplies the roots used to verify servers, for example:
/// ```rust
/// let client = streamdrain::downstream::get_client(streamdrain::downstream::webpki_trust);
/// ```
/// Plain `http://` urls are allowed, which is handy for local receivers.
pub fn get_client<TrustFunction>(tls_trust: TrustFunction) -> Result<HttpClient, StdError>
where
    TrustFunction: FnOnce() -> RootCertStore,
{
    let tls = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(tls_trust())
        .with_no_client_auth();

    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    let https_connector = tower::ServiceBuilder::new()
        .layer_fn(move |http_connector| {
            let tls = tls.clone();

            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls)
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http_connector)
        })
        .service(http_connector);

    Ok(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https_connector))
}
