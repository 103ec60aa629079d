//! End-to-end session behavior against a scripted mock instrument.

mod support;

use std::{sync::Arc, time::Duration};

use async_std::task;

use support::{spawn_tcp, CoreState, MockAsyncServer, MockCoreServer, MOCK_LID, MOCK_STB};
use vxi11_client::client::prelude::*;
use vxi11_client::common::vxi11::xdr::{reason, DeviceFlags};

#[async_std::test]
async fn open_and_identify() {
    let server = MockCoreServer::new(1024);
    server.script_read(reason::END, b"KEITHLEY INSTRUMENTS,MODEL DMM6500,04089397,1.0.01b");
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    assert!(session.is_open().await);
    assert_eq!(session.device_name().await.as_deref(), Some("inst0"));
    assert_eq!(session.max_recv_size().await, Some(1024));

    let idn = session.query("*IDN?", 1000).await.unwrap();
    assert!(idn.starts_with("KEITHLEY"));

    let state = server.state.lock().unwrap();
    // create_link carried the defaults
    assert_eq!(state.create_links.len(), 1);
    assert_eq!(state.create_links[0].device, "inst0");
    assert!(!state.create_links[0].lock_device);
    assert_eq!(state.create_links[0].lock_timeout, 10_000);
    // one write chunk, END flagged, then one END-terminated read
    assert_eq!(state.writes.len(), 1);
    assert_eq!(state.writes[0], (DeviceFlags::END, b"*IDN?".to_vec()));
    assert_eq!(state.read_parms.len(), 1);
    assert_eq!(state.read_parms[0].request_size, 1000);
    assert_eq!(state.read_parms[0].flags, DeviceFlags::default());
    assert_eq!(state.read_parms[0].term_char, 0);
    assert_eq!(state.read_parms[0].io_timeout, 10_000);
}

#[async_std::test]
async fn write_fragments_against_max_recv_size() {
    let server = MockCoreServer::new(16);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();

    let payload: Vec<u8> = (0u8..40).collect();
    session.write(&payload).await.unwrap();

    let state = server.state.lock().unwrap();
    assert_eq!(state.writes.len(), 3);
    assert_eq!(state.writes[0], (0, payload[..16].to_vec()));
    assert_eq!(state.writes[1], (0, payload[16..32].to_vec()));
    assert_eq!(state.writes[2], (DeviceFlags::END, payload[32..].to_vec()));
    let total: usize = state.writes.iter().map(|(_, d)| d.len()).sum();
    assert_eq!(total, 40);
}

#[async_std::test]
async fn partial_acceptance_resends_the_tail() {
    let server = MockCoreServer::new(1024);
    server
        .state
        .lock()
        .unwrap()
        .write_accepts
        .extend([3, 2]);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    session.write(b"hello").await.unwrap();

    let state = server.state.lock().unwrap();
    assert_eq!(state.writes.len(), 2);
    assert_eq!(state.writes[0], (DeviceFlags::END, b"hello".to_vec()));
    assert_eq!(state.writes[1], (DeviceFlags::END, b"lo".to_vec()));
}

#[async_std::test]
async fn stalled_write_is_bounded() {
    let server = MockCoreServer::new(1024);
    server
        .state
        .lock()
        .unwrap()
        .write_accepts
        .extend([0, 0]);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    assert!(matches!(
        session.write(b"hello").await,
        Err(Error::WriteStalled)
    ));
    assert_eq!(server.state.lock().unwrap().writes.len(), 2);
}

#[async_std::test]
async fn empty_write_issues_no_rpc() {
    let server = MockCoreServer::new(1024);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    session.write(b"").await.unwrap();
    assert!(server.state.lock().unwrap().writes.is_empty());
}

#[async_std::test]
async fn read_stops_at_termination_character() {
    let server = MockCoreServer::new(1024);
    server.script_read(reason::CHR, b"hello\n");
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    session
        .set_read_terminator(ReadTerminator::Char(b'\n'))
        .unwrap();

    let data = session.read(100).await.unwrap();
    assert_eq!(data, b"hello\n");

    let state = server.state.lock().unwrap();
    assert_eq!(state.read_parms.len(), 1);
    assert!(state.read_parms[0].flags.is_termchrset());
    assert_eq!(state.read_parms[0].term_char, b'\n');
}

#[async_std::test]
async fn read_accumulates_until_end() {
    let server = MockCoreServer::new(1024);
    server.script_read(0, b"AB");
    server.script_read(reason::END, b"CD");
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();

    let data = session.read(10).await.unwrap();
    assert_eq!(data, b"ABCD");

    let state = server.state.lock().unwrap();
    assert_eq!(state.read_parms.len(), 2);
    assert_eq!(state.read_parms[0].request_size, 10);
    // The second request asks only for what is left
    assert_eq!(state.read_parms[1].request_size, 8);
}

#[async_std::test]
async fn full_buffer_without_end_is_an_error() {
    let server = MockCoreServer::new(1024);
    server.script_read(0, b"\x01\x02\x03\x04\x05\x06\x07\x08");
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();

    assert!(matches!(
        session.read(8).await,
        Err(Error::ReadBufferFull(8))
    ));
    // No second read was attempted
    assert_eq!(server.state.lock().unwrap().read_parms.len(), 1);
}

#[async_std::test]
async fn overdelivering_server_is_rejected() {
    let server = MockCoreServer::new(1024);
    server.script_read(reason::END, b"123456789");
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    assert!(matches!(session.read(8).await, Err(Error::ReadOverrun)));
}

#[async_std::test]
async fn device_errors_keep_their_code() {
    let server = MockCoreServer::new(1024);
    server.state.lock().unwrap().reads.push_back(MockCoreServer::read_reply(
        DeviceErrorCode::Unknown(99),
        0,
        b"",
    ));
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    let err = session.read(16).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Device(DeviceErrorCode::Unknown(99))
    ));
    assert_eq!(err.to_string(), "device returned: unknown error 99");
}

#[async_std::test]
async fn control_operations() {
    let server = MockCoreServer::new(1024);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    session.set_lock_timeout(Duration::from_secs(2));

    session.trigger().await.unwrap();
    session.clear().await.unwrap();
    session.remote().await.unwrap();
    session.local().await.unwrap();
    assert_eq!(session.readstb().await.unwrap(), MOCK_STB);
    session.lock().await.unwrap();
    session.unlock().await.unwrap();

    let state = server.state.lock().unwrap();
    assert_eq!(state.generic_procs.len(), 5);
    assert_eq!(state.locks.len(), 1);
    assert!(state.locks[0].flags.is_waitlock());
    assert_eq!(state.locks[0].lock_timeout, 2_000);
    assert_eq!(state.unlocks, 1);
}

#[async_std::test]
async fn docmd_wrappers_encode_little_endian() {
    let server = MockCoreServer::new(1024);
    server
        .state
        .lock()
        .unwrap()
        .docmd_out
        .push_back(vec![0x01, 0x00]);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();

    let srq_line = session
        .docmd_bus_status(BusStatus::ServiceRequest)
        .await
        .unwrap();
    assert_eq!(srq_line, 1);
    session.docmd_send_command(b"\x3f\x5f").await.unwrap();
    session.docmd_atn_control(true).await.unwrap();
    session.docmd_ren_control(false).await.unwrap();
    session.docmd_pass_control(5).await.unwrap();
    session.docmd_bus_address(21).await.unwrap();
    session.docmd_ifc_control().await.unwrap();

    let state = server.state.lock().unwrap();
    let cmds: Vec<i32> = state.docmds.iter().map(|d| d.cmd).collect();
    assert_eq!(
        cmds,
        vec![0x20001, 0x20000, 0x20002, 0x20003, 0x20004, 0x2000A, 0x20010]
    );
    for docmd in &state.docmds {
        assert!(!docmd.network_order);
        assert_eq!(docmd.flags, DeviceFlags::default());
    }
    // bus_status: 2-byte type, little endian
    assert_eq!(state.docmds[0].datasize, 2);
    assert_eq!(&state.docmds[0].data_in.0, &[0x02, 0x00]);
    // send_command: raw bytes, element size 1
    assert_eq!(state.docmds[1].datasize, 1);
    assert_eq!(&state.docmds[1].data_in.0, &[0x3f, 0x5f]);
    assert_eq!(&state.docmds[2].data_in.0, &[0x01, 0x00]);
    assert_eq!(&state.docmds[3].data_in.0, &[0x00, 0x00]);
    // addresses: 4-byte little endian
    assert_eq!(state.docmds[4].datasize, 4);
    assert_eq!(&state.docmds[4].data_in.0, &[0x05, 0x00, 0x00, 0x00]);
    assert_eq!(&state.docmds[5].data_in.0, &[0x15, 0x00, 0x00, 0x00]);
    // ifc: no payload
    assert_eq!(state.docmds[6].datasize, 0);
    assert!(state.docmds[6].data_in.is_empty());
}

#[async_std::test]
async fn query_parses_numbers() {
    let server = MockCoreServer::new(1024);
    server.script_read(reason::END, b"9.9E+37\n");
    server.script_read(reason::END, b" 128\n");
    server.script_read(reason::END, b"pickle\n");
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();

    assert_eq!(session.query_f64("VOLT?").await.unwrap(), 9.9e37);
    assert_eq!(session.query_i32("*ESR?").await.unwrap(), 128);
    assert!(matches!(
        session.query_i32("*ESR?").await,
        Err(Error::Parse(_))
    ));
}

#[async_std::test]
async fn reopen_after_close() {
    let server = MockCoreServer::new(1024);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    session.open_direct(addr, None).await.unwrap();
    assert!(matches!(
        session.open_direct(addr, None).await,
        Err(Error::AlreadyOpen)
    ));

    session.close().await.unwrap();
    assert!(!session.is_open().await);
    assert_eq!(server.state.lock().unwrap().destroy_links, 1);
    // Closing again is a no-op
    session.close().await.unwrap();

    session.open_direct(addr, None).await.unwrap();
    assert!(session.is_open().await);
    assert_eq!(server.state.lock().unwrap().create_links.len(), 2);
}

#[async_std::test]
async fn failed_link_creation_leaves_session_reusable() {
    let server = MockCoreServer::new(1024);
    server
        .state
        .lock()
        .unwrap()
        .link_errors
        .push_back(DeviceErrorCode::DeviceNotAccessible);
    let addr = spawn_tcp(server.clone()).await;

    let session = Session::new();
    assert!(matches!(
        session.open_direct(addr, Some("gpib0,9")).await,
        Err(Error::Device(DeviceErrorCode::DeviceNotAccessible))
    ));
    assert!(!session.is_open().await);

    session.open_direct(addr, Some("gpib0,9")).await.unwrap();
    assert_eq!(
        session.device_name().await.as_deref(),
        Some("gpib0,9")
    );
}

#[async_std::test]
async fn abort_interrupts_a_blocked_read() {
    let (wake_tx, wake_rx) = async_std::channel::bounded(1);
    let async_server = Arc::new(MockAsyncServer {
        aborts: std::sync::Mutex::new(Vec::new()),
        wake: wake_tx,
    });
    let async_addr = spawn_tcp(async_server.clone()).await;

    // A core mock whose read blocks until the abort channel fires
    let server = Arc::new(MockCoreServer {
        max_recv_size: 1024,
        abort_port: async_addr.port(),
        state: std::sync::Mutex::new(CoreState::default()),
        abort_signal: Some(wake_rx),
    });
    let addr = spawn_tcp(server.clone()).await;

    let session = Arc::new(Session::new());
    session.open_direct(addr, None).await.unwrap();

    let reader = {
        let session = session.clone();
        task::spawn(async move { session.read(1_000_000).await })
    };
    // Let the read reach the server before aborting it
    task::sleep(Duration::from_millis(50)).await;
    session.abort().await.unwrap();

    assert!(matches!(
        reader.await,
        Err(Error::Device(DeviceErrorCode::Abort))
    ));
    assert_eq!(async_server.aborts.lock().unwrap().as_slice(), &[MOCK_LID]);

    // The abort client is kept; a second abort reuses it
    session.abort().await.unwrap();
    assert_eq!(async_server.aborts.lock().unwrap().len(), 2);
}
