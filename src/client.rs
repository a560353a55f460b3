//! The client handle: connect, handshake, and command dispatch.

use std::sync::Arc;
use std::time::Duration;

use crate::bson::{DocBuf, DocView};
use crate::collection::Collection;
use crate::connection::ClientConnection;
use crate::error::{Error, Result};
use crate::exec::{Emitter, just_status, timeout};
use crate::reactor::{AddrList, Reactor, StreamHandle};
use crate::status::{ServerErrorCode, Status};

/// Connection parameters. The URI surface above this is a plain
/// `host:port`; richer connection-string parsing belongs to a layer this
/// library does not provide.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    /// Deadline for resolve + connect + handshake.
    pub connect_timeout: Duration,
    /// Per-command deadline. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Reported to the server in the handshake metadata.
    pub app_name: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> ClientOptions {
        ClientOptions {
            host: "127.0.0.1".to_string(),
            port: 27017,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            app_name: None,
        }
    }
}

impl ClientOptions {
    pub fn for_address(host: impl Into<String>, port: u16) -> ClientOptions {
        ClientOptions {
            host: host.into(),
            port,
            ..ClientOptions::default()
        }
    }
}

struct ClientInner {
    reactor: Arc<dyn Reactor>,
    conn: ClientConnection,
    /// Serializes command exchanges: one outstanding OP_MSG per
    /// connection.
    exchange: tokio::sync::Mutex<()>,
    hello_reply: DocBuf,
    options: ClientOptions,
}

/// A handle on one server connection. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Resolve, connect and run the `hello` handshake.
    pub async fn connect(reactor: Arc<dyn Reactor>, options: ClientOptions) -> Result<Client> {
        let connect_chain = {
            let resolve_reactor = reactor.clone();
            let connect_reactor = reactor.clone();
            let host = options.host.clone();
            let service = options.port.to_string();
            Emitter::from_start(move |h| resolve_reactor.resolve(&host, &service, h)).and_then_ok(
                move |res| match res.value.downcast::<AddrList>() {
                    Ok(addrs) => {
                        Emitter::from_start(move |h| connect_reactor.tcp_connect(addrs, h))
                    }
                    Err(_) => just_status(Status::generic(libc::EINVAL)),
                },
            )
        };
        let deadline = options.connect_timeout;
        let res = timeout(reactor.clone(), connect_chain, deadline)
            .into_future()
            .await;
        if res.status.is_error() {
            return Err(Error::Status(res.status));
        }
        let stream = res
            .value
            .downcast::<StreamHandle>()
            .map_err(|_| Error::Msg("connect pipeline delivered an unexpected value".into()))?;

        let conn = ClientConnection::new(reactor.clone(), stream);
        let hello = build_hello(&options)?;
        let hello_em = conn.send_op_msg(hello);
        let hello_em = timeout(reactor.clone(), hello_em, deadline);
        let res = hello_em.into_future().await;
        if res.status.is_error() {
            return Err(Error::Status(res.status));
        }
        let reply = res
            .value
            .downcast::<DocBuf>()
            .map_err(|_| Error::Msg("handshake delivered an unexpected value".into()))?;
        let hello_reply = check_server_reply(reply)?;
        tracing::info!(
            host = %options.host,
            port = options.port,
            max_wire_version = hello_reply.as_view().get_i32("maxWireVersion").unwrap_or(0),
            "connected"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                reactor,
                conn,
                exchange: tokio::sync::Mutex::new(()),
                hello_reply,
                options,
            }),
        })
    }

    /// Run a command against `db`. Appends `$db` to the document if the
    /// caller has not set one, serializes the exchange, and maps `ok: 0`
    /// replies onto server-category errors.
    pub async fn command(&self, db: &str, mut body: DocBuf) -> Result<DocBuf> {
        {
            let mut m = body.mutate();
            if m.find("$db")?.is_none() {
                m.append_str("$db", db)?;
            }
        }
        let _exchange = self.inner.exchange.lock().await;
        let em = self.inner.conn.send_op_msg(body);
        let em = match self.inner.options.request_timeout {
            Some(deadline) => timeout(self.inner.reactor.clone(), em, deadline),
            None => em,
        };
        let res = em.into_future().await;
        if res.status.is_error() {
            return Err(Error::Status(res.status));
        }
        let reply = res
            .value
            .downcast::<DocBuf>()
            .map_err(|_| Error::Msg("command pipeline delivered an unexpected value".into()))?;
        check_server_reply(reply)
    }

    /// A round-trip `ping`.
    pub async fn ping(&self) -> Result<()> {
        let mut doc = DocBuf::new();
        doc.mutate().append_int32("ping", 1)?;
        self.command("admin", doc).await?;
        Ok(())
    }

    pub fn database(&self, name: impl Into<String>) -> Database {
        Database {
            client: self.clone(),
            name: name.into(),
        }
    }

    /// The server's handshake reply.
    pub fn server_hello(&self) -> DocBuf {
        self.inner.hello_reply.clone()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn reactor(&self) -> Arc<dyn Reactor> {
        self.inner.reactor.clone()
    }
}

/// A named database on a [`Client`].
#[derive(Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection::new(self.client.clone(), self.name.clone(), name.into())
    }

    pub async fn run_command(&self, body: DocBuf) -> Result<DocBuf> {
        self.client.command(&self.name, body).await
    }
}

fn build_hello(options: &ClientOptions) -> Result<DocBuf> {
    let mut doc = DocBuf::new();
    let mut m = doc.mutate();
    m.append_int32("hello", 1)?;
    m.append_str("$db", "admin")?;
    let meta_pos = m.append_doc("client", DocView::empty())?;
    {
        let mut meta = m.child_at(meta_pos)?;
        if let Some(app_name) = &options.app_name {
            let app_pos = meta.append_doc("application", DocView::empty())?;
            let mut app = meta.child_at(app_pos)?;
            app.append_str("name", app_name)?;
        }
        let driver_pos = meta.append_doc("driver", DocView::empty())?;
        {
            let mut driver = meta.child_at(driver_pos)?;
            driver.append_str("name", "monoxide")?;
            driver.append_str("version", env!("CARGO_PKG_VERSION"))?;
        }
        let os_pos = meta.append_doc("os", DocView::empty())?;
        let mut os = meta.child_at(os_pos)?;
        os.append_str("type", std::env::consts::OS)?;
    }
    drop(m);
    Ok(doc)
}

/// Interpret a command reply: `ok: 1` passes the document through, while
/// `ok: 0` becomes a server-category error carrying the reply's `code`
/// and `errmsg`.
fn check_server_reply(reply: DocBuf) -> Result<DocBuf> {
    let ok = reply.as_view().get_number("ok").unwrap_or(0.0);
    if ok == 1.0 {
        return Ok(reply);
    }
    let code = reply
        .as_view()
        .get_i32("code")
        .unwrap_or(ServerErrorCode::UnknownError as i32);
    let message = reply
        .as_view()
        .get_str("errmsg")
        .unwrap_or("server reported failure")
        .to_string();
    tracing::debug!(code, %message, "command failed on the server");
    Err(Error::Server {
        status: Status::server(code),
        message,
        reply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_document_shape() {
        let options = ClientOptions {
            app_name: Some("demo".to_string()),
            ..ClientOptions::default()
        };
        let doc = build_hello(&options).unwrap();
        let view = doc.as_view();
        assert_eq!(view.get_i32("hello"), Some(1));
        assert_eq!(view.get_str("$db"), Some("admin"));
        let meta = view.get_doc("client").unwrap();
        assert_eq!(
            meta.get_doc("application").unwrap().get_str("name"),
            Some("demo")
        );
        let driver = meta.get_doc("driver").unwrap();
        assert_eq!(driver.get_str("name"), Some("monoxide"));
        assert_eq!(meta.get_doc("os").unwrap().get_str("type"), Some(std::env::consts::OS));
    }

    #[test]
    fn reply_checking_maps_server_errors() {
        let mut reply = DocBuf::new();
        {
            let mut m = reply.mutate();
            m.append_double("ok", 0.0).unwrap();
            m.append_int32("code", 50).unwrap();
            m.append_str("errmsg", "timed out").unwrap();
        }
        let err = check_server_reply(reply).unwrap_err();
        match err {
            Error::Server {
                status, message, ..
            } => {
                assert_eq!(status, Status::server(50));
                assert!(status.is_timeout());
                assert_eq!(message, "timed out");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn reply_checking_accepts_integer_ok() {
        let mut reply = DocBuf::new();
        reply.mutate().append_int32("ok", 1).unwrap();
        assert!(check_server_reply(reply).is_ok());
    }
}
