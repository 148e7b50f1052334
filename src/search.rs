//! Search streams and result entries.

use std::collections::HashMap;
use std::time::Duration;

use crate::controls::Control;
use crate::exop::Exop;
use crate::filter;
use crate::ldap::Ldap;
use crate::protocol::{ItemReceiver, LdapOp, PartialAttribute, ProtocolOp, SearchRequest};
use crate::result::{LdapError, LdapResult, Result, ResultCode};

use tokio::sync::mpsc;
use tokio::time;

/// Possible values for search scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Base object; search only the object named in the base DN.
    Base = 0,
    /// Search the objects immediately below the base DN.
    OneLevel = 1,
    /// Search the object named in the base DN and the whole subtree below it.
    Subtree = 2,
}

impl Scope {
    pub(crate) fn from_i64(v: i64) -> Option<Scope> {
        match v {
            0 => Some(Scope::Base),
            1 => Some(Scope::OneLevel),
            2 => Some(Scope::Subtree),
            _ => None,
        }
    }
}

/// Possible values for alias dereferencing during search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DerefAliases {
    /// Never dereference.
    #[default]
    Never = 0,
    /// Dereference while retrieving objects according to search scope.
    Searching = 1,
    /// Dereference while finding the base object.
    Finding = 2,
    /// Always dereference.
    Always = 3,
}

impl DerefAliases {
    pub(crate) fn from_i64(v: i64) -> Option<DerefAliases> {
        match v {
            0 => Some(DerefAliases::Never),
            1 => Some(DerefAliases::Searching),
            2 => Some(DerefAliases::Finding),
            3 => Some(DerefAliases::Always),
            _ => None,
        }
    }
}

/// How the driver queues search responses for a consumer.
///
/// With a bounded queue, a consumer that stops reading eventually stalls
/// the connection driver, and through it the socket. An unbounded queue
/// never stalls the driver but buffers without limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkMode {
    /// Buffer up to the given number of items, then apply backpressure.
    Bounded(usize),
    /// Buffer without limit.
    Unbounded,
}

/// One item of a search stream, as routed by the connection driver.
#[derive(Debug)]
pub enum SearchItem {
    Item(EntryItem),
    Done(LdapResult),
}

/// A non-terminal search stream element.
#[derive(Clone, Debug)]
pub enum EntryItem {
    Entry {
        dn: String,
        attrs: Vec<PartialAttribute>,
    },
    Referral(Vec<String>),
    Intermediate(Exop),
}

/// An element of the search result stream: an entry, a reference, or an
/// intermediate message, with the controls that arrived on its envelope.
#[derive(Clone, Debug)]
pub struct ResultEntry {
    pub(crate) item: EntryItem,
    /// Response controls delivered with this element.
    pub ctrls: Vec<Control>,
}

impl ResultEntry {
    /// Returns true if the element is a search reference.
    pub fn is_ref(&self) -> bool {
        matches!(self.item, EntryItem::Referral(_))
    }

    /// Returns true if the element is an intermediate message.
    pub fn is_intermediate(&self) -> bool {
        matches!(self.item, EntryItem::Intermediate(_))
    }

    /// The reference URIs, if the element is a search reference.
    pub fn refs(&self) -> Option<&[String]> {
        match self.item {
            EntryItem::Referral(ref uris) => Some(uris),
            _ => None,
        }
    }
}

/// Additional parameters for the Search operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SearchOptions {
    pub deref: DerefAliases,
    pub typesonly: bool,
    pub timelimit: i32,
    pub sizelimit: i32,
    /// Response queueing; `None` uses the connection default.
    pub queue: Option<SinkMode>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            deref: DerefAliases::default(),
            typesonly: false,
            timelimit: 0,
            sizelimit: 0,
            queue: None,
        }
    }
}

impl SearchOptions {
    /// Create an instance of the structure with default values.
    pub fn new() -> Self {
        SearchOptions {
            ..Default::default()
        }
    }

    /// Set the method for dereferencing aliases.
    pub fn deref(mut self, d: DerefAliases) -> Self {
        self.deref = d;
        self
    }

    /// Set the indicator of returning just attribute names (`true`)
    /// vs. names and values (`false`).
    pub fn typesonly(mut self, typesonly: bool) -> Self {
        self.typesonly = typesonly;
        self
    }

    /// Set the time limit, in seconds, for the whole search operation.
    ///
    /// This is a server-side limit of the elapsed time for performing the
    /// operation, _not_ a network timeout for retrieving result entries or
    /// the result of the whole operation.
    pub fn timelimit(mut self, timelimit: i32) -> Self {
        self.timelimit = timelimit;
        self
    }

    /// Set the size limit, in entries, for the whole search operation.
    pub fn sizelimit(mut self, sizelimit: i32) -> Self {
        self.sizelimit = sizelimit;
        self
    }

    /// Choose how responses are queued for this search.
    pub fn queue(mut self, mode: SinkMode) -> Self {
        self.queue = Some(mode);
        self
    }
}

/// Parsed search result entry.
///
/// While LDAP attributes can have a variety of syntaxes, they're all
/// returned in search results as octet strings, without any associated
/// type information. The parser tries to convert every value into a
/// `String`; an attribute with values that don't parse as UTF-8 lands,
/// with all its values, in the `bin_attrs` map instead. Since a
/// particular set of values for a binary attribute _could_ convert, a
/// binary attribute should be checked for in both maps.
#[derive(Debug, Clone)]
pub struct SearchEntry {
    /// Entry DN.
    pub dn: String,
    /// Attributes.
    pub attrs: HashMap<String, Vec<String>>,
    /// Binary-valued attributes.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl SearchEntry {
    /// Convert a result element into attribute map(s).
    ///
    /// __Note__: this function will panic if the element is not an entry.
    pub fn construct(re: ResultEntry) -> SearchEntry {
        let (dn, attrs) = match re.item {
            EntryItem::Entry { dn, attrs } => (dn, attrs),
            _ => panic!("not a search entry"),
        };
        let mut attr_vals = HashMap::new();
        let mut bin_attr_vals: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        for pa in attrs {
            let mut any_binary = false;
            let values = pa
                .vals
                .into_iter()
                .filter_map(|v| match String::from_utf8(v) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        bin_attr_vals
                            .entry(pa.atype.clone())
                            .or_default()
                            .push(e.into_bytes());
                        any_binary = true;
                        None
                    }
                })
                .collect::<Vec<String>>();
            if any_binary {
                bin_attr_vals
                    .get_mut(&pa.atype)
                    .expect("bin vector")
                    .extend(values.into_iter().map(String::into_bytes));
            } else {
                attr_vals.insert(pa.atype, values);
            }
        }
        SearchEntry {
            dn,
            attrs: attr_vals,
            bin_attrs: bin_attr_vals,
        }
    }
}

/// Possible states of a `SearchStream`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    /// Stream which hasn't yet been initialized in `start()`.
    Fresh,
    /// Initialized stream which can be iterated through with `next()`.
    Active,
    /// Stream from which all entries have been retrieved.
    Done,
    /// Properly finalized stream on which `finish()` was called.
    Closed,
    /// Stream in an error state after some fallible operation.
    Error,
}

/// Asynchronous handle for obtaining a stream of search results.
///
/// User code can't construct a stream directly, but only by calling
/// [`streaming_search()`](struct.Ldap.html#method.streaming_search) on an
/// `Ldap` handle.
///
/// A streaming search should be used where the expected size of the
/// result set varies considerably between searches, or can rise above a
/// few tens to hundreds of KB. Once initiated, the stream is driven to
/// the end by repeatedly calling [`next()`](#method.next) until it
/// returns `Ok(None)` or an error, after which [`finish()`](#method.finish)
/// returns the overall result. Dropping the stream early without calling
/// [`abandon()`](#method.abandon) leaves the operation running on the
/// server.
#[derive(Debug)]
pub struct SearchStream {
    pub(crate) ldap: Ldap,
    rx: Option<ItemReceiver>,
    state: StreamState,
    abandoned: bool,
    timeout: Option<Duration>,
    pub res: Option<LdapResult>,
}

impl SearchStream {
    pub(crate) fn new(ldap: Ldap) -> Self {
        SearchStream {
            ldap,
            rx: None,
            state: StreamState::Fresh,
            abandoned: false,
            timeout: None,
            res: None,
        }
    }

    pub(crate) async fn start(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<String>,
    ) -> Result<()> {
        if self.state != StreamState::Fresh {
            return Ok(());
        }
        let opts = self.ldap.search_opts.take().unwrap_or_default();
        self.timeout = self.ldap.timeout;
        let filter = filter::parse_with(self.ldap.defaults.filter_mode, filter)?;
        let req = ProtocolOp::SearchRequest(SearchRequest {
            base: base.into(),
            scope,
            deref: opts.deref,
            sizelimit: opts.sizelimit,
            timelimit: opts.timelimit,
            typesonly: opts.typesonly,
            filter,
            attrs,
        });
        let mode = opts
            .queue
            .unwrap_or(SinkMode::Bounded(self.ldap.defaults.search_high_water));
        let (tx, rx) = match mode {
            SinkMode::Bounded(n) => {
                let (tx, rx) = mpsc::channel(n.max(1));
                (
                    crate::protocol::ItemSender::Bounded(tx),
                    ItemReceiver::Bounded(rx),
                )
            }
            SinkMode::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (
                    crate::protocol::ItemSender::Unbounded(tx),
                    ItemReceiver::Unbounded(rx),
                )
            }
        };
        self.rx = Some(rx);
        if let Some(timeout) = self.timeout {
            self.ldap.with_timeout(timeout);
        }
        let res = self.ldap.op_call(LdapOp::Search(tx), req).await.map(|_| {
            self.state = StreamState::Active;
        });
        if res.is_err() {
            self.state = StreamState::Error;
        }
        res
    }

    /// Fetch the next element of the result stream.
    ///
    /// Returns `Ok(None)` at the end of the stream.
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> Result<Option<ResultEntry>> {
        if self.abandoned {
            return Err(LdapError::Abandoned);
        }
        if self.state != StreamState::Active {
            return Ok(None);
        }
        let rx = self.rx.as_mut().expect("item receiver");
        let item = if let Some(timeout) = self.timeout {
            match time::timeout(timeout, rx.recv()).await {
                Ok(item) => item,
                Err(elapsed) => {
                    // deadline expired: tell the server to stop, fail locally
                    let last_id = self.ldap.last_id;
                    let mut ldap = self.ldap.clone();
                    let _ = ldap.abandon(last_id).await;
                    self.state = StreamState::Error;
                    return Err(LdapError::Timeout { elapsed });
                }
            }
        } else {
            rx.recv().await
        };
        let (item, controls) = match item {
            Some(item) => item,
            None => {
                self.rx = None;
                self.state = StreamState::Error;
                return Err(if self.ldap.is_conn_closed() {
                    LdapError::ConnectionClosed
                } else {
                    LdapError::Abandoned
                });
            }
        };
        match item {
            SearchItem::Item(entry) => Ok(Some(ResultEntry {
                item: entry,
                ctrls: controls,
            })),
            SearchItem::Done(mut res) => {
                res.ctrls = controls;
                self.res = Some(res);
                self.rx = None;
                self.state = StreamState::Done;
                Ok(None)
            }
        }
    }

    /// Abandon the search on the server and terminate the stream. The
    /// cancellation resolves locally even if the server never
    /// acknowledges it; any late responses are discarded by the driver.
    pub async fn abandon(&mut self) -> Result<()> {
        if self.state == StreamState::Active {
            let last_id = self.ldap.last_id;
            self.ldap.abandon(last_id).await?;
        }
        self.abandoned = true;
        self.rx = None;
        Ok(())
    }

    /// Return the overall result of the Search.
    ///
    /// If the stream has been read to the end, the return value is the
    /// actual result returned by the server. Otherwise a synthetic
    /// cancellation result is returned, and it's the user's responsibility
    /// to abandon the operation on the server if it hasn't been already.
    pub async fn finish(&mut self) -> LdapResult {
        if self.state == StreamState::Closed {
            return LdapResult {
                rc: ResultCode::Other(80),
                matched: String::from(""),
                text: String::from("stream already finalized"),
                refs: vec![],
                ctrls: vec![],
            };
        }
        if self.state != StreamState::Done && !self.abandoned {
            let last_id = self.ldap.last_id;
            if let Err(e) = self.ldap.id_scrub_tx.send(last_id) {
                log::warn!(
                    "error sending scrub message from SearchStream::finish() for ID {}: {}",
                    last_id,
                    e
                );
            }
        }
        self.state = StreamState::Closed;
        self.rx = None;
        self.res.take().unwrap_or_else(|| LdapResult {
            rc: ResultCode::Other(88),
            matched: String::from(""),
            text: String::from("user cancelled"),
            refs: vec![],
            ctrls: vec![],
        })
    }

    /// Return the current state of the stream.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Return the `Ldap` handle of the stream.
    pub fn ldap_handle(&mut self) -> &mut Ldap {
        &mut self.ldap
    }
}
