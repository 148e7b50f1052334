//! Synchronous interface.

use std::time::Duration;

use crate::RequestId;
use crate::conn::{LdapConnAsync, LdapConnSettings};
use crate::controls::IntoRawControlVec;
use crate::exop::Exop;
use crate::ldap::{Ldap, SaslProvider};
use crate::modify::Mod;
use crate::object::LdapObject;
use crate::result::{CompareResult, ExopResult, LdapResult, Result, SearchResult};
use crate::search::{ResultEntry, Scope, SearchOptions, SearchStream};

use tokio::runtime::{self, Runtime};
use url::Url;

/// Synchronous connection to an LDAP server.
///
/// In this version of the interface, [`new()`](#method.new) will return
/// a struct encapsulating a runtime, the connection, and an operation
/// handle. All operations are performed through that struct,
/// synchronously: the thread will wait until the result is available or
/// the operation times out.
///
/// The API is virtually identical to the asynchronous one. The chief
/// difference is that `LdapConn` is not cloneable: if you need another
/// handle, you must open a new connection.
#[derive(Debug)]
pub struct LdapConn {
    rt: Runtime,
    ldap: Ldap,
}

impl LdapConn {
    /// Open a connection to an LDAP server specified by `url`.
    ///
    /// See [`LdapConnAsync::new()`](crate::conn::LdapConnAsync#method.new)
    /// for the details of the supported URL formats.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_settings(LdapConnSettings::new(), url)
    }

    /// Open a connection to an LDAP server specified by `url`, using
    /// `settings` to specify additional parameters.
    pub fn with_settings(settings: LdapConnSettings, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        Self::from_url_with_settings(settings, &url)
    }

    /// Open a connection to an LDAP server specified by an already
    /// parsed `Url`.
    pub fn from_url(url: &Url) -> Result<Self> {
        Self::from_url_with_settings(LdapConnSettings::new(), url)
    }

    /// Open a connection to an LDAP server specified by an already
    /// parsed `Url`, using `settings` to specify additional parameters.
    pub fn from_url_with_settings(settings: LdapConnSettings, url: &Url) -> Result<Self> {
        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let ldap = rt.block_on(async move {
            let (conn, ldap) = LdapConnAsync::from_url_with_settings(settings, url).await?;
            crate::drive!(conn);
            Ok::<Ldap, crate::result::LdapError>(ldap)
        })?;
        Ok(LdapConn { ldap, rt })
    }

    /// See [`Ldap::with_search_options()`](crate::ldap::Ldap#method.with_search_options).
    pub fn with_search_options(&mut self, opts: SearchOptions) -> &mut Self {
        self.ldap.search_opts = Some(opts);
        self
    }

    /// See [`Ldap::with_controls()`](crate::ldap::Ldap#method.with_controls).
    pub fn with_controls<V: IntoRawControlVec>(&mut self, ctrls: V) -> &mut Self {
        self.ldap.controls = Some(ctrls.into());
        self
    }

    /// See [`Ldap::with_timeout()`](crate::ldap::Ldap#method.with_timeout).
    pub fn with_timeout(&mut self, duration: Duration) -> &mut Self {
        self.ldap.timeout = Some(duration);
        self
    }

    /// See [`Ldap::simple_bind()`](crate::ldap::Ldap#method.simple_bind).
    pub fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.simple_bind(bind_dn, bind_pw).await })
    }

    /// See [`Ldap::sasl_external_bind()`](crate::ldap::Ldap#method.sasl_external_bind).
    pub fn sasl_external_bind(&mut self) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.sasl_external_bind().await })
    }

    /// See [`Ldap::sasl_bind()`](crate::ldap::Ldap#method.sasl_bind).
    pub fn sasl_bind<P: SaslProvider>(
        &mut self,
        mech: &str,
        provider: &mut P,
    ) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.sasl_bind(mech, provider).await })
    }

    /// See [`Ldap::search()`](crate::ldap::Ldap#method.search).
    pub fn search<S: AsRef<str> + Send + Sync, A: AsRef<[S]> + Send + Sync>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: A,
    ) -> Result<SearchResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.search(base, scope, filter, attrs).await })
    }

    /// Perform a Search, returning a handle for retrieving entries one
    /// by one. See [`EntryStream`](struct.EntryStream.html) for the
    /// protocol which must be adhered to in this case.
    pub fn streaming_search<'b, S: AsRef<str> + Send + Sync, A: AsRef<[S]> + Send + Sync>(
        &'b mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: A,
    ) -> Result<EntryStream<'b>> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        let stream =
            rt.block_on(async move { ldap.streaming_search(base, scope, filter, attrs).await })?;
        Ok(EntryStream { stream, conn: self })
    }

    /// See [`Ldap::add()`](crate::ldap::Ldap#method.add).
    pub fn add<S: AsRef<str>>(&mut self, dn: &str, attrs: Vec<(S, Vec<S>)>) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.add(dn, attrs).await })
    }

    /// See [`Ldap::compare()`](crate::ldap::Ldap#method.compare).
    pub fn compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<CompareResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.compare(dn, attr, val).await })
    }

    /// See [`Ldap::delete()`](crate::ldap::Ldap#method.delete).
    pub fn delete(&mut self, dn: &str) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.delete(dn).await })
    }

    /// See [`Ldap::modify()`](crate::ldap::Ldap#method.modify).
    pub fn modify(&mut self, dn: &str, mods: Vec<Mod>) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.modify(dn, mods).await })
    }

    /// See [`Ldap::modifydn()`](crate::ldap::Ldap#method.modifydn).
    pub fn modifydn(
        &mut self,
        dn: &str,
        rdn: &str,
        delete_old: bool,
        new_sup: Option<&str>,
    ) -> Result<LdapResult> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.modifydn(dn, rdn, delete_old, new_sup).await })
    }

    /// See [`Ldap::unbind()`](crate::ldap::Ldap#method.unbind).
    pub fn unbind(&mut self) -> Result<()> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.unbind().await })
    }

    /// See [`Ldap::extended()`](crate::ldap::Ldap#method.extended).
    pub fn extended<E>(&mut self, exop: E) -> Result<ExopResult>
    where
        E: Into<Exop>,
    {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.extended(exop).await })
    }

    /// See [`Ldap::whoami()`](crate::ldap::Ldap#method.whoami).
    pub fn whoami(&mut self) -> Result<crate::exop::WhoAmIResp> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.whoami().await })
    }

    /// See [`Ldap::probe_root_dse()`](crate::ldap::Ldap#method.probe_root_dse).
    pub fn probe_root_dse(&mut self) -> Result<crate::ldap::RootDse> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.probe_root_dse().await })
    }

    /// See [`Ldap::get()`](crate::ldap::Ldap#method.get).
    pub fn get<S: AsRef<str> + Send + Sync>(&mut self, dn: &str, attrs: &[S]) -> Result<LdapObject> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.get(dn, attrs).await })
    }

    /// See [`Ldap::last_id()`](crate::ldap::Ldap#method.last_id).
    pub fn last_id(&mut self) -> RequestId {
        self.ldap.last_id()
    }

    /// See [`Ldap::abandon()`](crate::ldap::Ldap#method.abandon).
    pub fn abandon(&mut self, msgid: RequestId) -> Result<()> {
        let rt = &mut self.rt;
        let ldap = &mut self.ldap;
        rt.block_on(async move { ldap.abandon(msgid).await })
    }

    /// See [`Ldap::is_closed()`](crate::ldap::Ldap#method.is_closed).
    pub fn is_closed(&mut self) -> bool {
        self.ldap.is_closed()
    }
}

/// Handle for obtaining a stream of search results, synchronously.
///
/// For compatibility with the async interface, the underlying machinery
/// is [`SearchStream`](crate::search::SearchStream); an `EntryStream`
/// shares the Tokio runtime with the `LdapConn` it was obtained from,
/// and the two can't be used in parallel, which is enforced by capturing
/// the connection reference for the stream's lifetime.
pub struct EntryStream<'b> {
    stream: SearchStream,
    conn: &'b mut LdapConn,
}

impl<'b> EntryStream<'b> {
    /// See [`SearchStream::next()`](crate::search::SearchStream#method.next).
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<ResultEntry>> {
        let rt = &mut self.conn.rt;
        let stream = &mut self.stream;
        rt.block_on(async move { stream.next().await })
    }

    /// See [`SearchStream::finish()`](crate::search::SearchStream#method.finish).
    ///
    /// The name `result()` was kept for backwards compatibility.
    pub fn result(mut self) -> LdapResult {
        let rt = &mut self.conn.rt;
        let stream = &mut self.stream;
        rt.block_on(async move { stream.finish().await })
    }

    /// See [`SearchStream::abandon()`](crate::search::SearchStream#method.abandon).
    pub fn abandon(&mut self) -> Result<()> {
        let rt = &mut self.conn.rt;
        let stream = &mut self.stream;
        rt.block_on(async move { stream.abandon().await })
    }

    /// Returns the Message ID of the initial Search.
    pub fn last_id(&mut self) -> RequestId {
        self.stream.ldap_handle().last_id()
    }
}
