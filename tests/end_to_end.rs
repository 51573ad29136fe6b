//! End-to-end exercises of the credential/context lifecycle engine against
//! a simulated credential daemon running on a background thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rpcsec_gss_client::auth::{Auth, AuthKey};
use rpcsec_gss_client::config::{CancelToken, GssConfig};
use rpcsec_gss_client::mechanism::identity::IdentityMechanism;
use rpcsec_gss_client::mechanism::{GssMechanism, Service};
use rpcsec_gss_client::xdr;

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn make_auth(config: GssConfig) -> Auth {
    make_auth_with_service(config, Service::Integrity)
}

fn make_auth_with_service(config: GssConfig, service: Service) -> Auth {
    let mechanism: Arc<dyn GssMechanism> = Arc::new(IdentityMechanism::default());
    let key = AuthKey {
        root_transport_id: 1,
        pseudoflavor: mechanism.pseudoflavor(service).unwrap(),
        target_name: None,
    };
    Auth::new(key, service, mechanism, config)
}

/// Spawn a thread that reads upcall bodies off `pipe` and writes back a
/// successful downcall granting a context to whatever uid was requested.
fn spawn_daemon_granting(auth: &'static Auth, version: u32) -> thread::JoinHandle<()> {
    auth.open_pipe(version).unwrap();
    let rx = auth.pipe(version).outbound_receiver();
    thread::spawn(move || {
        for body in rx.iter() {
            let uid = if version == 0 {
                u32::from_ne_bytes(body[..4].try_into().unwrap())
            } else {
                let text = String::from_utf8(body).unwrap();
                text.split_whitespace()
                    .find_map(|kv| kv.strip_prefix("uid="))
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap()
            };

            let mut downcall = Vec::new();
            xdr::write_u32(&mut downcall, uid);
            xdr::write_u32(&mut downcall, 3600);
            xdr::write_u32(&mut downcall, 128);
            xdr::write_netobj(&mut downcall, b"wirectx-bytes");
            xdr::write_u32(&mut downcall, 8);
            xdr::write_bytes(&mut downcall, b"SECRET01").unwrap();
            xdr::write_netobj(&mut downcall, b"host@example");

            auth.deliver_downcall(&downcall).unwrap();
        }
    })
}

#[test]
fn fresh_refresh_v1_reaches_uptodate() {
    init_tracing();
    let auth: &'static Auth = Box::leak(Box::new(make_auth(GssConfig::default())));
    let _daemon = spawn_daemon_granting(auth, 1);

    let cred = auth.credential_cache().lookup_or_create(1000, None, Service::Integrity).unwrap();
    assert!(cred.is_new());

    let ctx = auth.refresh_credential(&cred, None).unwrap();
    assert!(cred.is_uptodate());
    assert_eq!(ctx.acceptor_name.as_deref(), Some("host@example"));
    assert_eq!(ctx.wire_context, b"wirectx-bytes");
}

#[test]
fn expired_key_sets_negative_with_cooldown() {
    init_tracing();
    let mut config = GssConfig::default();
    config.expired_cred_retry_delay = Duration::from_millis(50);
    let auth: &'static Auth = Box::leak(Box::new(make_auth(config)));
    auth.open_pipe(1).unwrap();
    let rx = auth.pipe(1).outbound_receiver();

    thread::spawn(move || {
        for _body in rx.iter() {
            let mut downcall = Vec::new();
            xdr::write_u32(&mut downcall, 1000);
            xdr::write_u32(&mut downcall, 0);
            xdr::write_u32(&mut downcall, 0);
            xdr::write_i32(&mut downcall, -127); // EKEYEXPIRED
            auth.deliver_downcall(&downcall).unwrap();
        }
    });

    let cred = auth.credential_cache().lookup_or_create(1000, None, Service::Integrity).unwrap();
    let err = auth.refresh_credential(&cred, None);
    assert!(err.is_err());
    assert!(cred.is_negative());

    let err2 = auth.refresh_credential(&cred, None);
    assert!(err2.is_err(), "refresh within cooldown should still fail without a new upcall");

    thread::sleep(Duration::from_millis(80));
    assert!(cred.negative_cooldown_elapsed(Duration::from_millis(50)).unwrap());
}

#[test]
fn daemon_absent_times_out() {
    init_tracing();
    let mut config = GssConfig::default();
    config.daemon_probe_timeout = Duration::from_millis(100);
    let auth = make_auth(config);

    let cred = auth.credential_cache().lookup_or_create(42, None, Service::Integrity).unwrap();
    let result = auth.refresh_credential(&cred, None);
    assert!(result.is_err());
}

#[test]
fn refresh_is_interrupted_by_cancel_token_before_daemon_probe_times_out() {
    init_tracing();
    let mut config = GssConfig::default();
    config.daemon_probe_timeout = Duration::from_secs(30);
    let auth = make_auth(config);
    let cred = auth.credential_cache().lookup_or_create(77, None, Service::Integrity).unwrap();

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    let start = std::time::Instant::now();
    let result = auth.refresh_credential(&cred, Some(&cancel));
    assert!(result.is_err());
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "cancellation should abort the wait long before the 30s probe timeout"
    );
}

#[test]
fn concurrent_refresh_deduplicates_to_one_upcall() {
    init_tracing();
    let auth: &'static Auth = Box::leak(Box::new(make_auth(GssConfig::default())));
    auth.open_pipe(1).unwrap();
    let rx = auth.pipe(1).outbound_receiver();
    let upcall_count = Arc::new(AtomicU64::new(0));
    let counter = upcall_count.clone();

    thread::spawn(move || {
        for body in rx.iter() {
            counter.fetch_add(1, Ordering::SeqCst);
            let text = String::from_utf8(body).unwrap();
            let uid: u32 = text
                .split_whitespace()
                .find_map(|kv| kv.strip_prefix("uid="))
                .and_then(|v| v.parse().ok())
                .unwrap();
            // Simulate daemon latency so both tasks are guaranteed to join
            // the same pending upcall before it completes.
            thread::sleep(Duration::from_millis(50));
            let mut downcall = Vec::new();
            xdr::write_u32(&mut downcall, uid);
            xdr::write_u32(&mut downcall, 3600);
            xdr::write_u32(&mut downcall, 128);
            xdr::write_netobj(&mut downcall, b"ctx");
            xdr::write_u32(&mut downcall, 3);
            xdr::write_bytes(&mut downcall, b"KEY").unwrap();
            auth.deliver_downcall(&downcall).unwrap();
        }
    });

    let cred = auth.credential_cache().lookup_or_create(2000, None, Service::Integrity).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let (c1, b1) = (cred.clone(), barrier.clone());
    let t1 = thread::spawn(move || {
        b1.wait();
        auth.refresh_credential(&c1, None).unwrap()
    });
    let (c2, b2) = (cred.clone(), barrier.clone());
    let t2 = thread::spawn(move || {
        b2.wait();
        auth.refresh_credential(&c2, None).unwrap()
    });

    let ctx1 = t1.join().unwrap();
    let ctx2 = t2.join().unwrap();
    assert!(Arc::ptr_eq(&ctx1, &ctx2));
    assert_eq!(upcall_count.load(Ordering::SeqCst), 1);
}

#[test]
fn sequence_numbers_are_monotonic_under_contention() {
    init_tracing();
    let auth: &'static Auth = Box::leak(Box::new(make_auth(GssConfig::default())));
    let _daemon = spawn_daemon_granting(auth, 1);

    let cred = Arc::new(
        auth.credential_cache()
            .lookup_or_create(3000, None, Service::Integrity)
            .unwrap(),
    );
    auth.refresh_credential(&cred, None).unwrap();

    let handles: Vec<_> = (0..1000)
        .map(|_| {
            let cred = cred.clone();
            thread::spawn(move || cred.marshal(b"xid").unwrap().1)
        })
        .collect();

    let mut seqnos: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seqnos.sort_unstable();
    seqnos.dedup();
    assert_eq!(seqnos.len(), 1000);
    let min = *seqnos.first().unwrap();
    let expected: Vec<u32> = (min..min + 1000).collect();
    assert_eq!(seqnos, expected);
}

#[test]
fn privacy_round_trip_through_credential() {
    init_tracing();
    let auth: &'static Auth = Box::leak(Box::new(make_auth_with_service(
        GssConfig::default(),
        Service::Privacy,
    )));
    let _daemon = spawn_daemon_granting(auth, 1);

    let cred = auth
        .credential_cache()
        .lookup_or_create(4000, None, Service::Privacy)
        .unwrap();
    auth.refresh_credential(&cred, None).unwrap();

    let (_, seqno) = cred.marshal(b"xid-bytes").unwrap();
    let payload = vec![7u8; 8192];
    let wrapped = cred.wrap_request(&payload).unwrap();
    assert_eq!(wrapped.len() % 4, 0);
    let unwrapped = cred.unwrap_response(&wrapped, seqno).unwrap();
    assert_eq!(unwrapped, payload);
}
