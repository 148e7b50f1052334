//! Connection establishment and the driver loop.
//!
//! A connection is split in two: [`LdapConnAsync`], the driver owning
//! the socket, and the cloneable [`Ldap`](crate::ldap::Ldap) handle.
//! The driver is the single writer and single reader; handles submit
//! requests over a channel and suspend on per-operation response sinks,
//! which the driver resolves as it routes incoming messages by ID.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use crate::RequestId;
use crate::config::Defaults;
use crate::exop::DISCONNECTION_OID;
#[cfg(feature = "tls")]
use crate::exop::StartTls;
use crate::ldap::{ConnState, Ldap, MsgMap};
use crate::protocol::{ItemSender, LdapCodec, LdapOp, MaybeControls, ProtocolOp, ResultSender};
use crate::result::{LdapError, LdapResult, Result};
use crate::search::SearchItem;

use futures_util::sink::SinkExt;
#[cfg(feature = "tls")]
use futures_util::future::TryFutureExt;
use log::{debug, warn};
#[cfg(feature = "tls")]
use native_tls::TlsConnector;
#[cfg(unix)]
use percent_encoding::percent_decode;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::mpsc;
#[cfg(feature = "tls")]
use tokio::sync::oneshot;
use tokio::time;
#[cfg(feature = "tls")]
use tokio_native_tls::{TlsConnector as TokioTlsConnector, TlsStream};
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, Framed};
use url::Url;

#[derive(Debug)]
enum ConnType {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(TlsStream<TcpStream>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for ConnType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_read(cx, buf),
            #[cfg(unix)]
            ConnType::Unix(us) => Pin::new(us).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnType {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_write(cx, buf),
            #[cfg(unix)]
            ConnType::Unix(us) => Pin::new(us).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_flush(cx),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_flush(cx),
            #[cfg(unix)]
            ConnType::Unix(us) => Pin::new(us).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls).poll_shutdown(cx),
            #[cfg(unix)]
            ConnType::Unix(us) => Pin::new(us).poll_shutdown(cx),
        }
    }
}

/// An unsolicited server notification: the extended-response components
/// and the accompanying result.
pub type UnsolicitedNotice = (crate::exop::Exop, LdapResult);

/// Additional settings for an LDAP connection.
///
/// An instance with default values is constructed by
/// [`new()`](#method.new), and all available settings can be replaced
/// through a builder-like interface.
#[derive(Clone, Default)]
pub struct LdapConnSettings {
    conn_timeout: Option<Duration>,
    #[cfg(feature = "tls")]
    connector: Option<TlsConnector>,
    #[cfg(feature = "tls")]
    starttls: bool,
    #[cfg(feature = "tls")]
    no_tls_verify: bool,
    defaults: Option<Defaults>,
    unsolicited_tx: Option<mpsc::UnboundedSender<UnsolicitedNotice>>,
}

impl LdapConnSettings {
    /// Create an instance of the structure with default settings.
    pub fn new() -> LdapConnSettings {
        LdapConnSettings {
            ..Default::default()
        }
    }

    /// Set the connection timeout. If a connection to the server can't
    /// be established before the timeout expires, an error will be
    /// returned to the user. Defaults to `None`, meaning an infinite
    /// timeout.
    pub fn set_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = Some(timeout);
        self
    }

    #[cfg(feature = "tls")]
    /// Set a custom TLS connector, which enables setting various options
    /// when establishing a secure connection. The default of `None` will
    /// use a connector with default settings.
    pub fn set_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    #[cfg(feature = "tls")]
    /// If `true`, use the StartTLS extended operation to establish a
    /// secure connection. Defaults to `false`.
    pub fn set_starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    #[cfg(feature = "tls")]
    /// The `starttls` setting indicates whether the StartTLS extended
    /// operation will be used to establish a secure connection.
    pub fn starttls(&self) -> bool {
        self.starttls
    }

    #[cfg(not(feature = "tls"))]
    /// Always `false` when no TLS support is compiled in.
    pub fn starttls(&self) -> bool {
        false
    }

    #[cfg(feature = "tls")]
    /// If `true`, try to establish a TLS connection without certificate
    /// verification. Defaults to `false`.
    pub fn set_no_tls_verify(mut self, no_tls_verify: bool) -> Self {
        self.no_tls_verify = no_tls_verify;
        self
    }

    /// Use the given connection defaults instead of the built-in ones.
    pub fn set_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Deliver unsolicited server notifications (message ID zero) to the
    /// given channel. Without a listener they are logged and, except for
    /// the Notice of Disconnection, discarded.
    pub fn set_unsolicited_channel(
        mut self,
        tx: mpsc::UnboundedSender<UnsolicitedNotice>,
    ) -> Self {
        self.unsolicited_tx = Some(tx);
        self
    }
}

enum LoopMode {
    #[allow(dead_code)]
    SingleOp,
    Continuous,
}

/// Asynchronous connection to an LDAP server.
///
/// Opening a connection with [`new()`](#method.new) returns a tuple of
/// the connection itself and an [`Ldap`](crate::ldap::Ldap) handle for
/// performing operations. The connection must be spawned on the active
/// Tokio executor before the handle is used; the [`drive!`](crate::drive)
/// macro does this. For the connection `conn`, it is equivalent to:
///
/// ```rust,no_run
/// # use canopy::LdapConnAsync;
/// # use log::warn;
/// # #[tokio::main]
/// # async fn main() {
/// # let (conn, _ldap) = LdapConnAsync::new("ldap://localhost:2389").await.unwrap();
/// tokio::spawn(async move {
///     if let Err(e) = conn.drive().await {
///         warn!("LDAP connection error: {}", e);
///     }
/// });
/// # }
/// ```
pub struct LdapConnAsync {
    msgmap: Arc<Mutex<MsgMap>>,
    resultmap: HashMap<RequestId, ResultSender>,
    searchmap: HashMap<RequestId, ItemSender>,
    rx: mpsc::UnboundedReceiver<(RequestId, LdapOp, ProtocolOp, MaybeControls, ResultSender)>,
    id_scrub_rx: mpsc::UnboundedReceiver<RequestId>,
    unsolicited_tx: Option<mpsc::UnboundedSender<UnsolicitedNotice>>,
    stream: Framed<ConnType, LdapCodec>,
}

/// Drive the connection until its completion.
///
/// See the introduction of [LdapConnAsync](struct.LdapConnAsync.html)
/// for the exact code produced by the macro.
#[macro_export]
macro_rules! drive {
    ($conn:expr) => {
        $crate::tokio::spawn(async move {
            if let Err(e) = $conn.drive().await {
                $crate::log::warn!("LDAP connection error: {}", e);
            }
        });
    };
}

impl LdapConnAsync {
    /// Open a connection to an LDAP server specified by `url`, using
    /// `settings` to specify additional parameters.
    pub async fn with_settings(settings: LdapConnSettings, url: &str) -> Result<(Self, Ldap)> {
        let url = Url::parse(url)?;
        Self::from_url_with_settings(settings, &url).await
    }

    /// Open a connection to an LDAP server specified by `url`.
    ///
    /// The __ldap__ scheme, using a plain TCP connection, is always
    /// available. Unix-like platforms also support __ldapi__, using Unix
    /// domain sockets. With the __tls__ feature, the __ldaps__ scheme
    /// and StartTLS over __ldap__ are additionally supported.
    pub async fn new(url: &str) -> Result<(Self, Ldap)> {
        Self::with_settings(LdapConnSettings::new(), url).await
    }

    /// Open a connection to an LDAP server specified by an already
    /// parsed `Url`, using `settings` to specify additional parameters.
    pub async fn from_url_with_settings(
        settings: LdapConnSettings,
        url: &Url,
    ) -> Result<(Self, Ldap)> {
        let (conn, ldap) = if url.scheme() == "ldapi" {
            LdapConnAsync::new_unix(url, settings).await?
        } else {
            let mut settings = settings;
            let timeout = settings.conn_timeout.take();
            let conn_future = LdapConnAsync::new_tcp(url, settings);
            if let Some(timeout) = timeout {
                time::timeout(timeout, conn_future).await??
            } else {
                conn_future.await?
            }
        };
        {
            let mut mm = conn.msgmap.lock().expect("msgmap mutex (open)");
            mm.state = ConnState::Open;
        }
        Ok((conn, ldap))
    }

    /// Open a connection to an LDAP server specified by an already
    /// parsed `Url`.
    pub async fn from_url(url: &Url) -> Result<(Self, Ldap)> {
        Self::from_url_with_settings(LdapConnSettings::new(), url).await
    }

    #[cfg(unix)]
    async fn new_unix(url: &Url, settings: LdapConnSettings) -> Result<(Self, Ldap)> {
        let path = url.host_str().unwrap_or("");
        if path.is_empty() {
            return Err(LdapError::EmptyUnixPath);
        }
        if path.contains(':') {
            return Err(LdapError::PortInUnixPath);
        }
        let dec_path = percent_decode(path.as_bytes()).decode_utf8_lossy();
        let stream = UnixStream::connect(dec_path.as_ref()).await?;
        let (conn, mut ldap) = Self::conn_pair(ConnType::Unix(stream), &settings);
        ldap.host = dec_path.into_owned();
        ldap.unix_socket = true;
        Ok((conn, ldap))
    }

    #[cfg(not(unix))]
    async fn new_unix(_url: &Url, _settings: LdapConnSettings) -> Result<(Self, Ldap)> {
        unimplemented!("no Unix domain sockets on non-Unix platforms");
    }

    #[allow(unused_mut)]
    async fn new_tcp(url: &Url, mut settings: LdapConnSettings) -> Result<(Self, Ldap)> {
        let mut port = 389;
        let scheme = match url.scheme() {
            s @ "ldap" => {
                if settings.starttls() {
                    "starttls"
                } else {
                    s
                }
            }
            #[cfg(feature = "tls")]
            s @ "ldaps" => {
                settings = settings.set_starttls(false);
                port = 636;
                s
            }
            s => return Err(LdapError::UnknownScheme(String::from(s))),
        };
        if let Some(url_port) = url.port() {
            port = url_port;
        }
        let (hostname, host_port) = match url.host_str() {
            Some("") | None => ("localhost".to_owned(), format!("localhost:{}", port)),
            Some(h) => (h.to_owned(), format!("{}:{}", h, port)),
        };
        let stream = TcpStream::connect(host_port.as_str()).await?;
        let (mut conn, mut ldap) = Self::conn_pair(ConnType::Tcp(stream), &settings);
        ldap.host = hostname.clone();
        match scheme {
            "ldap" => (),
            #[cfg(feature = "tls")]
            s @ "ldaps" | s @ "starttls" => {
                if s == "starttls" {
                    let (tx, rx) = oneshot::channel();
                    tokio::spawn(async move {
                        conn.single_op(tx).await;
                    });
                    let res =
                        tokio::try_join!(rx.map_err(LdapError::from), ldap.extended(StartTls));
                    match res {
                        Ok((conn_res, res)) => {
                            conn = conn_res?;
                            res.success()?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                let parts = conn.stream.into_parts();
                let tls_stream = if let ConnType::Tcp(stream) = parts.io {
                    LdapConnAsync::create_tls_stream(settings, &hostname, stream).await?
                } else {
                    panic!("underlying stream not TCP");
                };
                conn.stream = parts.codec.framed(ConnType::Tls(tls_stream));
                ldap.has_tls = true;
            }
            _ => unimplemented!(),
        }
        Ok((conn, ldap))
    }

    #[cfg(feature = "tls")]
    async fn create_tls_stream(
        settings: LdapConnSettings,
        hostname: &str,
        stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>> {
        let connector = match settings.connector {
            Some(connector) => connector,
            None => {
                let mut builder = TlsConnector::builder();
                if settings.no_tls_verify {
                    builder.danger_accept_invalid_certs(true);
                }
                builder.build()?
            }
        };
        TokioTlsConnector::from(connector)
            .connect(hostname, stream)
            .await
            .map_err(LdapError::from)
    }

    fn conn_pair(ctype: ConnType, settings: &LdapConnSettings) -> (Self, Ldap) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id_scrub_tx, id_scrub_rx) = mpsc::unbounded_channel();
        let msgmap = Arc::new(Mutex::new(MsgMap::new()));
        let conn = LdapConnAsync {
            msgmap: msgmap.clone(),
            resultmap: HashMap::new(),
            searchmap: HashMap::new(),
            rx,
            id_scrub_rx,
            unsolicited_tx: settings.unsolicited_tx.clone(),
            stream: LdapCodec.framed(ctype),
        };
        let ldap = Ldap {
            msgmap,
            tx,
            id_scrub_tx,
            defaults: Arc::new(settings.defaults.clone().unwrap_or_default()),
            host: String::new(),
            unix_socket: false,
            has_tls: false,
            last_id: 0,
            timeout: None,
            controls: None,
            search_opts: None,
        };
        (conn, ldap)
    }

    /// Repeatedly poll the connection until it exits.
    pub async fn drive(self) -> Result<()> {
        self.turn(LoopMode::Continuous).await.map(|_| ())
    }

    #[cfg(feature = "tls")]
    pub(crate) async fn single_op(self, tx: oneshot::Sender<Result<Self>>) {
        if tx.send(self.turn(LoopMode::SingleOp).await).is_err() {
            warn!("single op send error");
        }
    }

    fn mark_closed(&mut self) {
        let mut mm = self.msgmap.lock().expect("msgmap mutex (close)");
        mm.state = ConnState::Closed;
        mm.in_use.clear();
    }

    /// Fail every pending operation: dropping the response senders makes
    /// the waiters resolve with `ConnectionClosed`. The state must flip
    /// to `Closed` before the senders are dropped, since the waiters
    /// read it to tell a dead connection from an abandoned operation.
    fn fail_pending(&mut self) {
        self.mark_closed();
        self.resultmap.clear();
        self.searchmap.clear();
    }

    async fn turn(mut self, mode: LoopMode) -> Result<Self> {
        loop {
            tokio::select! {
                req_id = self.id_scrub_rx.recv() => {
                    if let Some(req_id) = req_id {
                        self.resultmap.remove(&req_id);
                        self.searchmap.remove(&req_id);
                        let mut msgmap = self.msgmap.lock().expect("msgmap mutex (id scrub)");
                        msgmap.in_use.remove(&req_id);
                    }
                },
                op_tuple = self.rx.recv() => {
                    let Some((id, op, req, controls, tx)) = op_tuple else {
                        break;
                    };
                    if let LdapOp::Search(ref search_tx) = op {
                        self.searchmap.insert(id, search_tx.clone());
                    }
                    if let Err(e) = self.stream.send((id, req, controls)).await {
                        warn!("socket send error: {}", e);
                        self.fail_pending();
                        return Err(LdapError::from(e));
                    }
                    match op {
                        LdapOp::Single => {
                            self.resultmap.insert(id, tx);
                            continue;
                        },
                        LdapOp::Search(_) => (),
                        LdapOp::Abandon(msgid) => {
                            self.resultmap.remove(&msgid);
                            self.searchmap.remove(&msgid);
                            let mut msgmap = self.msgmap.lock().expect("msgmap mutex (abandon)");
                            msgmap.in_use.remove(&msgid);
                            msgmap.in_use.remove(&id);
                        },
                        LdapOp::Unbind => {
                            if let Err(e) = self.stream.get_mut().shutdown().await {
                                warn!("socket shutdown error: {}", e);
                            }
                            if let Err(e) = self.stream.close().await {
                                warn!("socket close error: {}", e);
                            }
                            self.mark_closed();
                        },
                    }
                    // acknowledge the flushed write; the waiter may be gone
                    let _ = tx.send(None);
                },
                resp = self.stream.next() => {
                    let (id, op, controls) = match resp {
                        None => {
                            self.fail_pending();
                            break;
                        },
                        Some(Err(e)) => {
                            warn!("socket receive error: {}", e);
                            self.fail_pending();
                            return Err(LdapError::from(e));
                        },
                        Some(Ok(resp)) => resp,
                    };
                    if id == 0 {
                        if self.handle_unsolicited(op, controls) {
                            self.fail_pending();
                            break;
                        }
                        continue;
                    }
                    if let Some(tx) = self.searchmap.get(&id) {
                        let item = match op.into_search_item() {
                            Some(item) => item,
                            None => {
                                warn!("non-search response for search op {}", id);
                                continue;
                            }
                        };
                        let mut remove = matches!(item, SearchItem::Done(_));
                        if tx.send((item, controls)).await.is_err() {
                            debug!("search consumer gone, op={}", id);
                            remove = true;
                        }
                        if remove {
                            self.searchmap.remove(&id);
                            let mut msgmap = self.msgmap.lock().expect("msgmap mutex (search done)");
                            msgmap.in_use.remove(&id);
                        }
                    } else if let Some(tx) = self.resultmap.remove(&id) {
                        if let ProtocolOp::IntermediateResponse(_) = op {
                            // interim message; the operation is still open
                            debug!("discarding intermediate response for single op {}", id);
                            self.resultmap.insert(id, tx);
                            continue;
                        }
                        if tx.send(Some((op, controls))).is_err() {
                            warn!("ldap result send error, op={}", id);
                        }
                        let mut msgmap = self.msgmap.lock().expect("msgmap mutex (stream rx)");
                        msgmap.in_use.remove(&id);
                    } else {
                        warn!("unmatched id: {}", id);
                    }
                },
            };
            if let LoopMode::SingleOp = mode {
                break;
            }
        }
        if let LoopMode::Continuous = mode {
            self.mark_closed();
        }
        Ok(self)
    }

    /// Handle a message with ID zero. Returns `true` when it is the
    /// Notice of Disconnection, which ends the connection.
    fn handle_unsolicited(
        &mut self,
        op: ProtocolOp,
        controls: Vec<crate::controls::Control>,
    ) -> bool {
        let (res, exop) = match op {
            ProtocolOp::ExtendedResponse { res, exop } => (res, exop),
            other => {
                warn!("unsolicited message with unexpected op: {:?}", other);
                return false;
            }
        };
        let disconnect = exop.name.as_deref() == Some(DISCONNECTION_OID);
        if disconnect {
            warn!("server sent Notice of Disconnection");
        }
        if let Some(ref tx) = self.unsolicited_tx {
            let _ = tx.send((exop, res.into_ldap_result(controls)));
        } else if !disconnect {
            debug!("unsolicited notification dropped: no listener");
        }
        disconnect
    }
}
