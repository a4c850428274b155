//! Production [`Connector`]: a tonic channel and the Workload API `FetchX509SVID` stream.

use super::connector::{Closable, Connector};
use super::workload::{X509SvidRequest, X509SvidResponse};
use crate::endpoint::Endpoint;
use crate::BoxError;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint as TonicEndpoint, Uri};
use tonic::Streaming;
use tower::service_fn;

const TONIC_DUMMY_URI: &str = "http://[::]:50051";
const FETCH_X509_SVID_PATH: &str = "/SpiffeWorkloadAPI/FetchX509SVID";
const WORKLOAD_METADATA_KEY: &str = "workload.spiffe.io";

/// Dials the Workload API over a UNIX socket or loopback TCP and opens `FetchX509SVID`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcConnector;

/// A connected tonic channel.
#[derive(Debug)]
pub struct GrpcTransport(Option<Channel>);

/// An open `FetchX509SVID` response stream.
#[derive(Debug)]
pub struct GrpcCall(Option<Streaming<X509SvidResponse>>);

impl GrpcCall {
    /// Waits for the next update. `Ok(None)` means the server ended the stream.
    ///
    /// # Errors
    ///
    /// Returns the gRPC status on failure, or `Unavailable` if the call was closed.
    pub async fn message(&mut self) -> Result<Option<X509SvidResponse>, tonic::Status> {
        match self.0.as_mut() {
            Some(stream) => stream.message().await,
            None => Err(tonic::Status::unavailable("identity stream closed")),
        }
    }
}

impl Closable for GrpcTransport {
    fn close(&mut self) -> Result<(), BoxError> {
        self.0.take();
        Ok(())
    }
}

impl Closable for GrpcCall {
    fn close(&mut self) -> Result<(), BoxError> {
        self.0.take();
        Ok(())
    }
}

impl Connector for GrpcConnector {
    type Transport = GrpcTransport;
    type Call = GrpcCall;

    async fn dial(&self, endpoint: &Endpoint) -> Result<GrpcTransport, BoxError> {
        let channel = match endpoint {
            Endpoint::Unix(path) => connect_unix(path).await?,
            Endpoint::Tcp { host, port } => connect_tcp(*host, *port).await?,
        };
        Ok(GrpcTransport(Some(channel)))
    }

    async fn open_stream(&self, transport: &GrpcTransport) -> Result<GrpcCall, BoxError> {
        let channel = transport
            .0
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;

        let mut request = tonic::Request::new(X509SvidRequest {});
        request
            .metadata_mut()
            .insert(WORKLOAD_METADATA_KEY, MetadataValue::from_static("true"));

        let response = grpc
            .server_streaming(
                request,
                PathAndQuery::from_static(FETCH_X509_SVID_PATH),
                tonic_prost::ProstCodec::default(),
            )
            .await?;

        Ok(GrpcCall(Some(response.into_inner())))
    }
}

async fn connect_tcp(host: IpAddr, port: u16) -> Result<Channel, BoxError> {
    let uri = match host {
        IpAddr::V4(ip) => format!("http://{ip}:{port}"),
        IpAddr::V6(ip) => format!("http://[{ip}]:{port}"),
    };
    Ok(TonicEndpoint::try_from(uri)?.connect().await?)
}

#[cfg(unix)]
async fn connect_unix(path: &Path) -> Result<Channel, BoxError> {
    use tokio::net::UnixStream;

    let path: Arc<PathBuf> = Arc::new(path.to_path_buf());
    let channel = TonicEndpoint::try_from(TONIC_DUMMY_URI)?
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = Arc::clone(&path);
            async move {
                let stream = UnixStream::connect(path.as_path()).await?;
                Ok::<_, io::Error>(TokioIo::new(stream))
            }
        }))
        .await?;

    Ok(channel)
}

#[cfg(not(unix))]
async fn connect_unix(_path: &Path) -> Result<Channel, BoxError> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "unix sockets are not supported").into())
}
