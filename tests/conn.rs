//! Connection tests against a scripted in-process server.
//!
//! The "server" accepts one TCP connection and plays a fixed script:
//! it frames requests with the same BER parser the client uses, asserts
//! their shape, and answers with hand-built responses.

use canopy::{
    ConnState, LdapConnAsync, LdapError, ResultCode, Scope, SearchEntry, StreamState,
};
use canopy::controls::RawControl;

use canopy_ber::parse::{parse_int, parse_tag};
use canopy_ber::structure::StructureTag;
use canopy_ber::tag::TagClass;
use canopy_ber::types::{AsnTag, Enumerated, Integer, OctetString, Sequence, Set, Tag};
use canopy_ber::write::encode_into;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct Script {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Script {
    /// Read one LDAPMessage, returning its ID and the operation tag.
    async fn read_msg(&mut self) -> (i32, StructureTag) {
        loop {
            if !self.buf.is_empty() {
                match parse_tag(&self.buf) {
                    Ok((rest, tag)) => {
                        let consumed = self.buf.len() - rest.len();
                        self.buf.drain(..consumed);
                        let mut parts = tag
                            .expect_constructed()
                            .expect("envelope")
                            .into_iter();
                        let id_content = parts
                            .next()
                            .and_then(|t| t.expect_primitive())
                            .expect("message id");
                        let (_, msgid) = parse_int(&id_content).expect("id decode");
                        let op = parts.next().expect("op");
                        return (msgid as i32, op);
                    }
                    Err(e) if e.is_incomplete() => (),
                    Err(e) => panic!("malformed client frame: {:?}", e),
                }
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "client closed unexpectedly");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn send(&mut self, msgid: i32, op: Tag) {
        let envelope = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: msgid as i64,
                    ..Default::default()
                }),
                op,
            ],
            ..Default::default()
        });
        let mut buf = BytesMut::new();
        encode_into(&mut buf, envelope.into_structure()).expect("encode");
        self.stream.write_all(&buf).await.expect("write");
    }
}

fn octets(s: &str) -> Tag {
    Tag::OctetString(OctetString {
        inner: s.as_bytes().to_vec(),
        ..Default::default()
    })
}

/// An LDAPResult-shaped operation with the given application tag.
fn result_op(app_id: u64, rc: i64, extra: Vec<Tag>) -> Tag {
    let mut inner = vec![
        Tag::Enumerated(Enumerated {
            inner: rc,
            ..Default::default()
        }),
        octets(""),
        octets(""),
    ];
    inner.extend(extra);
    Tag::Sequence(Sequence {
        id: app_id,
        class: TagClass::Application,
        inner,
    })
}

fn entry_op(dn: &str, attr: &str, vals: &[&str]) -> Tag {
    Tag::Sequence(Sequence {
        id: 4,
        class: TagClass::Application,
        inner: vec![
            octets(dn),
            Tag::Sequence(Sequence {
                inner: vec![Tag::Sequence(Sequence {
                    inner: vec![
                        octets(attr),
                        Tag::Set(Set {
                            inner: vals.iter().map(|v| octets(v)).collect(),
                            ..Default::default()
                        }),
                    ],
                    ..Default::default()
                })],
                ..Default::default()
            }),
        ],
    })
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ldap://{}", listener.local_addr().expect("addr"));
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Script {
    let (stream, _) = listener.accept().await.expect("accept");
    Script {
        stream,
        buf: Vec::new(),
    }
}

#[tokio::test]
async fn bind_search_iterate() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut script = accept(&listener).await;

        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 0, "expected bind request");
        script.send(id, result_op(1, 0, vec![])).await;

        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 3, "expected search request");
        script
            .send(id, entry_op("uid=alice,dc=example,dc=org", "uid", &["alice"]))
            .await;
        script
            .send(id, entry_op("uid=bob,dc=example,dc=org", "uid", &["bob"]))
            .await;
        script.send(id, result_op(5, 0, vec![])).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    canopy::drive!(conn);

    let res = ldap
        .simple_bind("cn=admin,dc=example,dc=org", "secret")
        .await
        .expect("bind");
    assert_eq!(res.rc, ResultCode::Success);
    assert_eq!(ldap.conn_state(), ConnState::Bound);

    let mut stream = ldap
        .streaming_search(
            "dc=example,dc=org",
            Scope::Subtree,
            "(objectClass=posixAccount)",
            vec!["uid"],
        )
        .await
        .expect("search");
    let mut uids = vec![];
    while let Some(entry) = stream.next().await.expect("entry") {
        let entry = SearchEntry::construct(entry);
        uids.push(entry.attrs["uid"][0].clone());
    }
    assert_eq!(uids, vec!["alice", "bob"]);
    assert_eq!(stream.state(), StreamState::Done);
    let res = stream.finish().await;
    assert_eq!(res.rc, ResultCode::Success);

    server.await.expect("server");
}

#[tokio::test]
async fn abandon_mid_search_then_whoami() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut script = accept(&listener).await;

        let (search_id, op) = script.read_msg().await;
        assert_eq!(op.id, 3);
        script
            .send(search_id, entry_op("uid=a,dc=example", "uid", &["a"]))
            .await;
        script
            .send(search_id, entry_op("uid=b,dc=example", "uid", &["b"]))
            .await;

        // the next message on the socket must be the abandon for the search
        let (_, op) = script.read_msg().await;
        assert_eq!(op.id, 16, "expected abandon request");
        let target = op.expect_primitive().expect("abandoned id");
        let (_, target) = parse_int(&target).expect("id decode");
        assert_eq!(target as i32, search_id);

        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 23, "expected extended request");
        script
            .send(
                id,
                result_op(
                    24,
                    0,
                    vec![Tag::OctetString(OctetString {
                        id: 11,
                        class: TagClass::Context,
                        inner: b"dn:cn=admin,dc=example".to_vec(),
                    })],
                ),
            )
            .await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    canopy::drive!(conn);

    let mut stream = ldap
        .streaming_search("dc=example", Scope::Subtree, "(uid=*)", vec!["uid"])
        .await
        .expect("search");
    for _ in 0..2 {
        assert!(stream.next().await.expect("entry").is_some());
    }
    stream.abandon().await.expect("abandon");
    assert!(matches!(stream.next().await, Err(LdapError::Abandoned)));

    let who = ldap.whoami().await.expect("whoami");
    assert_eq!(who.authzid, "dn:cn=admin,dc=example");

    server.await.expect("server");
}

#[tokio::test]
async fn abandoned_single_op_resolves_abandoned() {
    let (listener, url) = listen().await;
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(async move {
        let mut script = accept(&listener).await;

        let (compare_id, op) = script.read_msg().await;
        assert_eq!(op.id, 14, "expected compare request");
        seen_tx.send(compare_id).expect("signal");

        // no response for the compare; the abandon must follow
        let (_, op) = script.read_msg().await;
        assert_eq!(op.id, 16, "expected abandon request");
        let target = op.expect_primitive().expect("abandoned id");
        let (_, target) = parse_int(&target).expect("id decode");
        assert_eq!(target as i32, compare_id);
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    canopy::drive!(conn);

    let mut other = ldap.clone();
    let pending =
        tokio::spawn(async move { other.compare("cn=x,dc=example", "cn", "x").await });
    let compare_id = seen_rx.await.expect("compare on the wire");
    ldap.abandon(compare_id).await.expect("abandon");

    // the connection is still open, so the waiter fails as abandoned
    assert!(matches!(
        pending.await.expect("join"),
        Err(LdapError::Abandoned)
    ));
    assert_eq!(ldap.conn_state(), ConnState::Open);

    server.await.expect("server");
}

#[tokio::test]
async fn unsolicited_disconnection_notice() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut script = accept(&listener).await;

        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 3);
        script.send(id, entry_op("uid=a,dc=example", "uid", &["a"])).await;
        // server-initiated close: Notice of Disconnection on ID zero
        script
            .send(
                0,
                result_op(
                    24,
                    52,
                    vec![Tag::OctetString(OctetString {
                        id: 10,
                        class: TagClass::Context,
                        inner: b"1.3.6.1.4.1.1466.20036".to_vec(),
                    })],
                ),
            )
            .await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    canopy::drive!(conn);

    let mut stream = ldap
        .streaming_search("dc=example", Scope::Subtree, "(uid=*)", vec!["uid"])
        .await
        .expect("search");
    assert!(stream.next().await.expect("entry").is_some());
    assert!(matches!(
        stream.next().await,
        Err(LdapError::ConnectionClosed)
    ));
    assert_eq!(ldap.conn_state(), ConnState::Closed);
    assert!(matches!(
        ldap.simple_bind("", "").await,
        Err(LdapError::ConnectionClosed)
    ));

    server.await.expect("server");
}

#[tokio::test]
async fn nonstrict_add_attrs_dedups() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut script = accept(&listener).await;

        // planner pre-fetch: a base search for just the referenced attribute
        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 3);
        script
            .send(
                id,
                entry_op("cn=foo,dc=example,dc=org", "description", &["a"]),
            )
            .await;
        script.send(id, result_op(5, 0, vec![])).await;

        // the modify must contain exactly one add, with only the new value
        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 6, "expected modify request");
        let mut parts = op.expect_constructed().expect("modify").into_iter();
        let dn = parts.next().and_then(|t| t.expect_primitive()).expect("dn");
        assert_eq!(dn, b"cn=foo,dc=example,dc=org");
        let changes = parts
            .next()
            .and_then(|t| t.expect_constructed())
            .expect("changes");
        assert_eq!(changes.len(), 1);
        let mut change = changes
            .into_iter()
            .next()
            .and_then(|t| t.expect_constructed())
            .expect("change")
            .into_iter();
        let op_content = change
            .next()
            .and_then(|t| t.expect_primitive())
            .expect("mod op");
        let (_, mod_op) = parse_int(&op_content).expect("mod op decode");
        assert_eq!(mod_op, 0, "expected an add");
        let mut part_attr = change
            .next()
            .and_then(|t| t.expect_constructed())
            .expect("partial attribute")
            .into_iter();
        let attr = part_attr
            .next()
            .and_then(|t| t.expect_primitive())
            .expect("attr");
        assert_eq!(attr, b"description");
        let vals: Vec<Vec<u8>> = part_attr
            .next()
            .and_then(|t| t.expect_constructed())
            .expect("values")
            .into_iter()
            .filter_map(|t| t.expect_primitive())
            .collect();
        assert_eq!(vals, vec![b"b".to_vec()]);
        script.send(id, result_op(7, 0, vec![])).await;
    });

    let (conn, ldap) = LdapConnAsync::new(&url).await.expect("connect");
    canopy::drive!(conn);

    let mut obj = ldap.obj("cn=foo,dc=example,dc=org").expect("obj");
    let res = obj
        .add_attrs(vec![("description", vec!["a", "b"])])
        .await
        .expect("add_attrs")
        .expect("one modify sent");
    assert_eq!(res.rc, ResultCode::Success);
    assert_eq!(
        obj.attrs.get_attr("description"),
        &["a".to_owned(), "b".to_owned()]
    );

    server.await.expect("server");
}

#[tokio::test]
async fn unknown_critical_control_fails_locally() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut script = accept(&listener).await;

        // root DSE probe
        let (id, op) = script.read_msg().await;
        assert_eq!(op.id, 3);
        script
            .send(
                id,
                entry_op("", "supportedControl", &["1.2.840.113556.1.4.319"]),
            )
            .await;
        script.send(id, result_op(5, 0, vec![])).await;

        // no further request may arrive; the critical-control search must
        // fail before sending. The socket just waits for the test to end.
        let mut sink = [0u8; 16];
        let _ = script.stream.read(&mut sink).await;
    });

    let (conn, mut ldap) = LdapConnAsync::new(&url).await.expect("connect");
    canopy::drive!(conn);

    let dse = ldap.probe_root_dse().await.expect("root dse");
    assert_eq!(dse.supported_controls, vec!["1.2.840.113556.1.4.319"]);

    let res = ldap
        .with_controls(RawControl {
            ctype: "1.2.3.4.5".into(),
            crit: true,
            val: None,
        })
        .search("dc=example", Scope::Subtree, "(uid=*)", vec!["uid"])
        .await;
    match res {
        Err(LdapError::UnsupportedControl(oid)) => assert_eq!(oid, "1.2.3.4.5"),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }

    drop(ldap);
    server.await.expect("server");
}
