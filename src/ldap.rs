//! The operation handle.
//!
//! [`Ldap`] is the cloneable handle through which all operations are
//! invoked; each clone multiplexes its operations onto the same
//! underlying connection, which is driven by the task spawned from
//! [`LdapConnAsync`](crate::conn::LdapConnAsync).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::RequestId;
use crate::config::Defaults;
use crate::controls::IntoRawControlVec;
use crate::exop::{Exop, STARTTLS_OID, WhoAmI, WhoAmIResp};
use crate::modify::{self, Mod};
use crate::protocol::{
    AuthChoice, LdapOp, MaybeControls, OpResult, PartialAttribute, ProtocolOp, ResultSender,
    split_response,
};
use crate::result::{
    CompareResult, ExopResult, LdapError, LdapResult, Result, ResultCode, SearchResult,
};
use crate::search::{Scope, SearchOptions, SearchStream};

use tokio::sync::{mpsc, oneshot};
use tokio::time;

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// Transport being established; StartTLS may still be in flight.
    Opening,
    /// Ready for operations, not authenticated.
    Open,
    /// A bind has completed successfully.
    Bound,
    /// Close requested; no new operations are accepted.
    Closing,
    /// The connection is gone; all pending operations have failed.
    Closed,
}

/// Shared per-connection bookkeeping: message ID allocation, lifecycle
/// state, and the probed root-DSE capabilities.
#[derive(Debug)]
pub(crate) struct MsgMap {
    pub(crate) last_id: RequestId,
    pub(crate) in_use: HashSet<RequestId>,
    pub(crate) state: ConnState,
    pub(crate) bind_in_flight: bool,
    pub(crate) supported_controls: Option<HashSet<String>>,
}

impl MsgMap {
    pub(crate) fn new() -> MsgMap {
        MsgMap {
            last_id: 0,
            in_use: HashSet::new(),
            state: ConnState::Opening,
            bind_in_flight: false,
            supported_controls: None,
        }
    }
}

/// External SASL mechanism provider.
///
/// The connection drives the RFC 4513 challenge loop; the provider
/// supplies the mechanism-specific tokens. Provider errors surface as
/// [`SaslNegotiationFailed`](LdapError::SaslNegotiationFailed).
pub trait SaslProvider {
    /// Begin an exchange; the returned bytes, if any, become the
    /// credentials of the first bind request.
    fn start(&mut self, mech: &str, host: &str) -> std::result::Result<Option<Vec<u8>>, String>;
    /// Respond to a server challenge.
    fn step(&mut self, challenge: &[u8]) -> std::result::Result<Vec<u8>, String>;
    /// Called once the server reports success.
    fn complete(&mut self) -> std::result::Result<(), String>;
}

/// Capabilities read from the root DSE.
#[derive(Clone, Debug, Default)]
pub struct RootDse {
    pub naming_contexts: Vec<String>,
    pub supported_controls: Vec<String>,
    pub supported_extensions: Vec<String>,
    pub supported_sasl_mechs: Vec<String>,
}

enum Gate {
    /// Refused while a bind is in flight.
    Normal,
    /// A bind; at most one may be in flight.
    Bind,
    /// Allowed during a bind: unbind, abandon, StartTLS.
    Exempt,
}

/// Asynchronous handle for LDAP operations.
///
/// All operations allow attaching request controls with
/// [`with_controls()`](#method.with_controls) and a per-operation
/// deadline with [`with_timeout()`](#method.with_timeout); the Search
/// operation additionally takes [`SearchOptions`] through
/// [`with_search_options()`](#method.with_search_options). The handle
/// can be freely cloned; each clone multiplexes operations on the same
/// connection, and dropping the last handle closes it.
#[derive(Debug)]
pub struct Ldap {
    pub(crate) msgmap: Arc<Mutex<MsgMap>>,
    pub(crate) tx: mpsc::UnboundedSender<(RequestId, LdapOp, ProtocolOp, MaybeControls, ResultSender)>,
    pub(crate) id_scrub_tx: mpsc::UnboundedSender<RequestId>,
    pub(crate) defaults: Arc<Defaults>,
    pub(crate) host: String,
    pub(crate) unix_socket: bool,
    pub(crate) has_tls: bool,
    pub(crate) last_id: RequestId,
    pub timeout: Option<Duration>,
    pub controls: MaybeControls,
    pub search_opts: Option<SearchOptions>,
}

impl Clone for Ldap {
    fn clone(&self) -> Self {
        Ldap {
            msgmap: self.msgmap.clone(),
            tx: self.tx.clone(),
            id_scrub_tx: self.id_scrub_tx.clone(),
            defaults: self.defaults.clone(),
            host: self.host.clone(),
            unix_socket: self.unix_socket,
            has_tls: self.has_tls,
            last_id: 0,
            timeout: None,
            controls: None,
            search_opts: None,
        }
    }
}

impl Ldap {
    fn alloc_msgid(mm: &mut MsgMap) -> Result<RequestId> {
        let start = mm.last_id;
        let mut next = start;
        loop {
            next = if next == RequestId::MAX { 1 } else { next + 1 };
            if !mm.in_use.contains(&next) {
                break;
            }
            if next == start {
                return Err(LdapError::TooManyOutstanding);
            }
        }
        mm.last_id = next;
        mm.in_use.insert(next);
        Ok(next)
    }

    fn clear_bind_flag(&self) {
        let mut mm = self.msgmap.lock().expect("msgmap mutex (bind flag)");
        mm.bind_in_flight = false;
    }

    /// Send an abandon for `msgid` without waiting for the write. Used
    /// on deadline expiry, where the caller resolves locally no matter
    /// what the server does.
    fn spawn_abandon(&self, msgid: RequestId) {
        let id = {
            let mut mm = self.msgmap.lock().expect("msgmap mutex (spawn abandon)");
            match Self::alloc_msgid(&mut mm) {
                Ok(id) => id,
                Err(_) => return,
            }
        };
        let (tx, _rx) = oneshot::channel();
        let _ = self.tx.send((
            id,
            LdapOp::Abandon(msgid),
            ProtocolOp::AbandonRequest(msgid),
            None,
            tx,
        ));
    }

    pub(crate) async fn op_call(
        &mut self,
        op: LdapOp,
        req: ProtocolOp,
    ) -> Result<(LdapResult, Exop, Option<Vec<u8>>)> {
        let gate = match (&op, &req) {
            (LdapOp::Abandon(_), _) | (LdapOp::Unbind, _) => Gate::Exempt,
            (_, ProtocolOp::BindRequest { .. }) => Gate::Bind,
            (_, ProtocolOp::ExtendedRequest(exop))
                if exop.name.as_deref() == Some(STARTTLS_OID) =>
            {
                Gate::Exempt
            }
            _ => Gate::Normal,
        };
        self.op_call_gated(op, req, gate).await
    }

    async fn op_call_gated(
        &mut self,
        op: LdapOp,
        req: ProtocolOp,
        gate: Gate,
    ) -> Result<(LdapResult, Exop, Option<Vec<u8>>)> {
        let controls = self.controls.take();
        if let Some(ref ctrls) = controls {
            let mm = self.msgmap.lock().expect("msgmap mutex (ctrl gate)");
            if let Some(ref supported) = mm.supported_controls {
                for ctrl in ctrls {
                    if ctrl.crit && !supported.contains(&ctrl.ctype) {
                        return Err(LdapError::UnsupportedControl(ctrl.ctype.clone()));
                    }
                }
            }
        }
        let is_bind = matches!(gate, Gate::Bind);
        let id = {
            let mut mm = self.msgmap.lock().expect("msgmap mutex (inc id)");
            if matches!(mm.state, ConnState::Closing | ConnState::Closed) {
                return Err(LdapError::ConnectionClosed);
            }
            if mm.bind_in_flight && !matches!(gate, Gate::Exempt) {
                return Err(LdapError::BindInProgress);
            }
            if is_bind {
                mm.bind_in_flight = true;
            }
            Self::alloc_msgid(&mut mm)?
        };
        self.last_id = id;
        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.tx.send((id, op, req, controls, tx)) {
            if is_bind {
                self.clear_bind_flag();
            }
            return Err(e.into());
        }
        let response = if let Some(timeout) = self.timeout.take() {
            match time::timeout(timeout, rx).await {
                Ok(res) => res,
                Err(elapsed) => {
                    self.spawn_abandon(id);
                    let _ = self.id_scrub_tx.send(id);
                    if is_bind {
                        self.clear_bind_flag();
                    }
                    return Err(LdapError::Timeout { elapsed });
                }
            }
        } else {
            rx.await
        };
        let response = match response {
            Ok(response) => response,
            Err(_) => {
                if is_bind {
                    self.clear_bind_flag();
                }
                // the driver dropped the response sender: either the
                // connection died, or the operation was abandoned from
                // another handle
                return Err(if self.is_conn_closed() {
                    LdapError::ConnectionClosed
                } else {
                    LdapError::Abandoned
                });
            }
        };
        let (result, exop, sasl_creds) = match response {
            None => (
                OpResult::success().into_ldap_result(vec![]),
                Exop {
                    name: None,
                    val: None,
                },
                None,
            ),
            Some((op, ctrls)) => split_response(op, ctrls)?,
        };
        if is_bind {
            let mut mm = self.msgmap.lock().expect("msgmap mutex (bind done)");
            mm.bind_in_flight = false;
            if result.rc.is_success() {
                mm.state = ConnState::Bound;
            }
        }
        Ok((result, exop, sasl_creds))
    }

    /// Use the provided `SearchOptions` with the next Search operation,
    /// which can be invoked directly on the result of this method.
    pub fn with_search_options(&mut self, opts: SearchOptions) -> &mut Self {
        self.search_opts = Some(opts);
        self
    }

    /// Pass the provided request control(s) to the next LDAP operation.
    ///
    /// This method accepts either a control vector or a single control,
    /// to keep the common single-control call site quiet.
    pub fn with_controls<V: IntoRawControlVec>(&mut self, ctrls: V) -> &mut Self {
        self.controls = Some(ctrls.into());
        self
    }

    /// Perform the next operation with the timeout given in `duration`.
    ///
    /// If the deadline expires, an Abandon is dispatched for the
    /// operation and the call fails with
    /// [`Timeout`](LdapError::Timeout); the connection remains usable.
    pub fn with_timeout(&mut self, duration: Duration) -> &mut Self {
        self.timeout = Some(duration);
        self
    }

    /// Do a simple Bind with the provided DN (`bind_dn`) and password
    /// (`bind_pw`).
    pub async fn simple_bind(&mut self, bind_dn: &str, bind_pw: &str) -> Result<LdapResult> {
        let req = ProtocolOp::BindRequest {
            version: 3,
            dn: bind_dn.into(),
            auth: AuthChoice::Simple(Vec::from(bind_pw.as_bytes())),
        };
        Ok(self.op_call(LdapOp::Single, req).await?.0)
    }

    /// Do an SASL EXTERNAL bind on the connection. The identity of the
    /// client must have already been established by connection-specific
    /// means, as is the case for Unix domain sockets or TLS client
    /// certificates. The bind is made with the hardcoded empty authzId
    /// value.
    pub async fn sasl_external_bind(&mut self) -> Result<LdapResult> {
        let req = ProtocolOp::BindRequest {
            version: 3,
            dn: String::new(),
            auth: AuthChoice::Sasl {
                mech: "EXTERNAL".into(),
                creds: Some(vec![]),
            },
        };
        Ok(self.op_call(LdapOp::Single, req).await?.0)
    }

    /// Do an SASL bind with the given mechanism, driving the challenge
    /// loop through the provider.
    pub async fn sasl_bind<P: SaslProvider>(
        &mut self,
        mech: &str,
        provider: &mut P,
    ) -> Result<LdapResult> {
        let sasl_err = LdapError::SaslNegotiationFailed;
        let host = self.host.clone();
        let initial = provider.start(mech, &host).map_err(sasl_err)?;
        let req = ProtocolOp::BindRequest {
            version: 3,
            dn: String::new(),
            auth: AuthChoice::Sasl {
                mech: mech.into(),
                creds: initial,
            },
        };
        let (mut res, _, mut creds) = self.op_call(LdapOp::Single, req).await?;
        while res.rc == ResultCode::SaslBindInProgress {
            let challenge = creds.take().unwrap_or_default();
            let token = provider.step(&challenge).map_err(sasl_err)?;
            let req = ProtocolOp::BindRequest {
                version: 3,
                dn: String::new(),
                auth: AuthChoice::Sasl {
                    mech: mech.into(),
                    creds: Some(token),
                },
            };
            let out = self.op_call(LdapOp::Single, req).await?;
            res = out.0;
            creds = out.2;
        }
        if res.rc.is_success() {
            provider.complete().map_err(sasl_err)?;
        }
        Ok(res)
    }

    /// The SASL mechanism conventionally assumed for this connection:
    /// EXTERNAL (by default) on Unix domain sockets, none elsewhere.
    pub fn default_sasl_mech(&self) -> Option<&str> {
        self.unix_socket
            .then(|| self.defaults.ldapi_sasl_mech.as_str())
    }

    /// Perform a Search with the given base DN (`base`), scope, filter,
    /// and the list of attributes to be returned (`attrs`). If `attrs`
    /// is empty, or contains the special name `*`, all user attributes
    /// are returned; `+` requests the operational attributes.
    ///
    /// All result entries are collected in a single vector; references
    /// found in the stream are folded into the `refs` vector of the
    /// result, and intermediate messages are discarded. For large or
    /// unknown result sizes, use
    /// [`streaming_search()`](#method.streaming_search).
    pub async fn search<S: AsRef<str> + Send + Sync, A: AsRef<[S]> + Send + Sync>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: A,
    ) -> Result<SearchResult> {
        let mut stream = self.streaming_search(base, scope, filter, attrs).await?;
        let mut re_vec = vec![];
        let mut refs = vec![];
        while let Some(entry) = stream.next().await? {
            if entry.is_ref() {
                refs.extend(entry.refs().unwrap_or(&[]).iter().cloned());
            } else if !entry.is_intermediate() {
                re_vec.push(entry);
            }
        }
        let mut res = stream.finish().await;
        res.refs.extend(refs);
        Ok(SearchResult(re_vec, res))
    }

    /// Perform a Search, returning a handle for retrieving entries one
    /// by one. See [`SearchStream`](crate::search::SearchStream) for the
    /// protocol which must be adhered to in this case.
    pub async fn streaming_search<S: AsRef<str> + Send + Sync, A: AsRef<[S]> + Send + Sync>(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: A,
    ) -> Result<SearchStream> {
        let mut ldap = self.clone();
        ldap.controls = self.controls.take();
        ldap.timeout = self.timeout.take();
        ldap.search_opts = self.search_opts.take();
        let attrs = attrs
            .as_ref()
            .iter()
            .map(|s| s.as_ref().to_owned())
            .collect();
        let mut stream = SearchStream::new(ldap);
        stream.start(base, scope, filter, attrs).await?;
        Ok(stream)
    }

    /// Add an entry named by `dn`, with the list of attributes and their
    /// values given in `attrs`. None of the value lists may be empty.
    pub async fn add<S: AsRef<str>>(
        &mut self,
        dn: &str,
        attrs: Vec<(S, Vec<S>)>,
    ) -> Result<LdapResult> {
        let mut any_empty = false;
        let attrs = attrs
            .into_iter()
            .map(|(name, vals)| {
                if vals.is_empty() {
                    any_empty = true;
                }
                PartialAttribute {
                    atype: name.as_ref().to_owned(),
                    vals: vals
                        .into_iter()
                        .map(|v| v.as_ref().as_bytes().to_vec())
                        .collect(),
                }
            })
            .collect();
        if any_empty {
            return Err(LdapError::AddNoValues);
        }
        let req = ProtocolOp::AddRequest {
            dn: dn.into(),
            attrs,
        };
        Ok(self.op_call(LdapOp::Single, req).await?.0)
    }

    /// Compare the value(s) of the attribute `attr` within an entry
    /// named by `dn` with the value `val`. The result code in the reply
    /// is `compareTrue` or `compareFalse` on a successful comparison.
    pub async fn compare<B: AsRef<[u8]>>(
        &mut self,
        dn: &str,
        attr: &str,
        val: B,
    ) -> Result<CompareResult> {
        let req = ProtocolOp::CompareRequest {
            dn: dn.into(),
            attr: attr.into(),
            value: val.as_ref().to_vec(),
        };
        Ok(CompareResult(self.op_call(LdapOp::Single, req).await?.0))
    }

    /// Delete an entry named by `dn`.
    pub async fn delete(&mut self, dn: &str) -> Result<LdapResult> {
        let req = ProtocolOp::DelRequest(dn.into());
        Ok(self.op_call(LdapOp::Single, req).await?.0)
    }

    /// Modify an entry named by `dn` by sequentially applying the
    /// modifications given by `mods`, exactly as given. The planner-based
    /// paths live on [`LdapObject`](crate::object::LdapObject).
    pub async fn modify(&mut self, dn: &str, mods: Vec<Mod>) -> Result<LdapResult> {
        let wire = modify::to_wire(mods, self.defaults.empty_list)?;
        self.modify_wire(dn, wire).await
    }

    pub(crate) async fn modify_wire(
        &mut self,
        dn: &str,
        mods: Vec<crate::protocol::ModSpec>,
    ) -> Result<LdapResult> {
        let req = ProtocolOp::ModifyRequest {
            dn: dn.into(),
            mods,
        };
        Ok(self.op_call(LdapOp::Single, req).await?.0)
    }

    /// Rename and/or move an entry named by `dn`. The new name is given
    /// by `rdn`. If `delete_old` is `true`, delete the previous value of
    /// the naming attribute from the entry. If the entry is to be moved
    /// elsewhere in the DIT, `new_sup` gives the new superior entry.
    pub async fn modifydn(
        &mut self,
        dn: &str,
        rdn: &str,
        delete_old: bool,
        new_sup: Option<&str>,
    ) -> Result<LdapResult> {
        let req = ProtocolOp::ModDnRequest {
            dn: dn.into(),
            rdn: rdn.into(),
            delete_old,
            new_sup: new_sup.map(str::to_owned),
        };
        Ok(self.op_call(LdapOp::Single, req).await?.0)
    }

    /// Perform an Extended operation given by `exop`. Extended
    /// operations are defined in the [`exop`](crate::exop) module.
    pub async fn extended<E>(&mut self, exop: E) -> Result<ExopResult>
    where
        E: Into<Exop>,
    {
        let req = ProtocolOp::ExtendedRequest(exop.into());
        self.op_call(LdapOp::Single, req)
            .await
            .map(|et| ExopResult(et.1, et.0))
    }

    /// Ask the server for the authorization identity of this connection
    /// (the WhoAmI extended operation).
    pub async fn whoami(&mut self) -> Result<WhoAmIResp> {
        let (exop, _res) = self.extended(WhoAmI).await?.success()?;
        Ok(WhoAmIResp {
            authzid: exop
                .val
                .map(|val| String::from_utf8_lossy(&val).into_owned())
                .unwrap_or_default(),
        })
    }

    /// Read the root DSE: naming contexts, supported controls,
    /// extensions and SASL mechanisms. The supported-control list is
    /// retained on the connection; afterwards, a request carrying a
    /// critical control the server does not advertise fails locally with
    /// [`UnsupportedControl`](LdapError::UnsupportedControl) before
    /// anything is sent.
    pub async fn probe_root_dse(&mut self) -> Result<RootDse> {
        let (entries, _res) = self
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec![
                    "namingContexts",
                    "supportedControl",
                    "supportedExtension",
                    "supportedSASLMechanisms",
                ],
            )
            .await?
            .success()?;
        let mut dse = RootDse::default();
        if let Some(entry) = entries.into_iter().next() {
            let entry = crate::search::SearchEntry::construct(entry);
            let take = |name: &str| -> Vec<String> {
                entry.attrs.get(name).cloned().unwrap_or_default()
            };
            dse.naming_contexts = take("namingContexts");
            dse.supported_controls = take("supportedControl");
            dse.supported_extensions = take("supportedExtension");
            dse.supported_sasl_mechs = take("supportedSASLMechanisms");
        }
        let mut mm = self.msgmap.lock().expect("msgmap mutex (root dse)");
        mm.supported_controls = Some(dse.supported_controls.iter().cloned().collect());
        Ok(dse)
    }

    /// Terminate the connection to the server.
    pub async fn unbind(&mut self) -> Result<()> {
        {
            let mut mm = self.msgmap.lock().expect("msgmap mutex (unbind)");
            if mm.state == ConnState::Closed {
                return Ok(());
            }
            mm.state = ConnState::Closing;
        }
        let req = ProtocolOp::UnbindRequest;
        self.op_call_gated(LdapOp::Unbind, req, Gate::Exempt)
            .await
            .map(|_| ())
    }

    /// Return the message ID of the last operation started through this
    /// handle. The intended use is obtaining the ID of a timed-out
    /// operation for a subsequent Abandon.
    pub fn last_id(&mut self) -> RequestId {
        self.last_id
    }

    /// Ask the server to abandon an operation identified by `msgid`.
    /// The local waiter for that operation is failed immediately; any
    /// late responses are discarded.
    pub async fn abandon(&mut self, msgid: RequestId) -> Result<()> {
        let req = ProtocolOp::AbandonRequest(msgid);
        self.op_call(LdapOp::Abandon(msgid), req).await.map(|_| ())
    }

    /// The connection lifecycle state.
    pub fn conn_state(&self) -> ConnState {
        self.msgmap.lock().expect("msgmap mutex (state)").state
    }

    pub(crate) fn is_conn_closed(&self) -> bool {
        matches!(self.conn_state(), ConnState::Closing | ConnState::Closed)
    }

    /// Check whether the channel to the connection driver has been
    /// closed. This does not perform any I/O; for a live check, use a
    /// round-trip operation such as [`whoami()`](#method.whoami).
    pub fn is_closed(&mut self) -> bool {
        self.tx.is_closed()
    }
}
