//! End-to-end flows through the `srv:` broker with the host kernel.

use std::sync::Arc;

use ctr_ipc::{
    COMMAND_BUFFER_WORDS, CommandBuffer, PortName,
    desc::{calling_pid_desc, move_handle_desc},
    header::make_header,
};
use ctr_kernel::{
    ControlMemory, Handle, Kernel, ProcessId, ResultCode, ToRawResultCode,
    host::{HostKernel, HostMemory},
};
use ctr_service::{
    FunctionInfo, Interface, IpcError, Namespace, RequestContext, Service, ServiceManager,
    Session, TranslateConfig,
};
use ctr_service_srv::{SRV_PORT_NAME, SrvError, install};

const CLIENT_PID: u32 = 0x24;

/// Echoes its normal parameters after the result code.
struct Echo;

impl Echo {
    const FUNCTIONS: &[FunctionInfo<Self>] = &[FunctionInfo::new(0x0001, Some(Self::echo), "Echo")];

    fn echo(&self, ctx: &mut RequestContext) -> Result<(), IpcError> {
        let params = ctx.params().to_vec();
        let mut rb = ctx.reply();
        for word in params {
            rb.push(word);
        }
        rb.finish()
    }
}

impl Service for Echo {
    fn port_name(&self) -> &'static str {
        "echo:u"
    }

    fn max_sessions(&self) -> u32 {
        1
    }

    fn functions(&self) -> &'static [FunctionInfo<Self>] {
        Self::FUNCTIONS
    }
}

struct Fixture {
    manager: Arc<ServiceManager>,
    kernel: HostKernel,
    srv: Session,
}

impl Fixture {
    fn new(config: TranslateConfig) -> Self {
        let manager = Arc::new(ServiceManager::with_config(config));
        install(&manager).unwrap();
        manager
            .add_service(Namespace::Srv, Arc::new(Interface::new(Echo).unwrap()))
            .unwrap();

        let srv = manager.connect_to_named_port(SRV_PORT_NAME).unwrap();
        Self {
            manager,
            kernel: HostKernel::new(ProcessId::from_raw(CLIENT_PID)),
            srv,
        }
    }

    fn call(&self, session: &Session, words: &[u32]) -> (ResultCode, Vec<u32>) {
        let mut buffer = CommandBuffer::from_words(words).unwrap();
        let rc = session.handle_sync_request(&self.kernel, &mut buffer);
        (rc, buffer.as_words().to_vec())
    }

    fn get_service_handle(&self, name: &str) -> (ResultCode, Vec<u32>) {
        let [low, high] = PortName::new(name).map_or([0x4141_4141; 2], |name| name.to_words());
        let request = [make_header(0x0005, 4, 0).unwrap(), low, high, name.len() as u32, 0];
        self.call(&self.srv, &request)
    }
}

#[test]
fn get_service_handle_moves_a_working_session() {
    let fixture = Fixture::new(TranslateConfig::default());

    let (rc, reply) = fixture.get_service_handle("echo:u");

    assert!(rc.is_success());
    assert_eq!(reply[0], make_header(0x0005, 1, 2).unwrap());
    assert_eq!(reply[2], move_handle_desc(1).unwrap());

    let handle = Handle::from_raw(reply[3]);
    let object = fixture.kernel.resolve_handle(handle).unwrap();
    let session = object.downcast_ref::<Session>().unwrap();
    assert_eq!(session.port().name(), "echo:u");
    assert_eq!(session.port().active_sessions(), 1);

    let (rc, reply) = fixture.call(session, &[make_header(0x0001, 2, 0).unwrap(), 7, 9]);
    assert!(rc.is_success());
    assert_eq!(reply, [make_header(0x0001, 3, 0).unwrap(), 0, 7, 9]);
}

#[test]
fn closing_the_handle_frees_the_session() {
    let fixture = Fixture::new(TranslateConfig::default());

    let (rc, reply) = fixture.get_service_handle("echo:u");
    assert!(rc.is_success());

    // Session limit of echo:u is 1
    let (rc, reply_busy) = fixture.get_service_handle("echo:u");
    assert_eq!(rc.to_raw(), 0xD040_1834);
    assert_eq!(reply_busy[..2], [make_header(0x0005, 1, 0).unwrap(), rc.to_raw()]);
    assert!(reply_busy[2..].iter().all(|word| *word == 0));

    fixture.kernel.invalidate_handle(Handle::from_raw(reply[3]));
    let (rc, _) = fixture.get_service_handle("echo:u");
    assert!(rc.is_success());
}

#[test]
fn unknown_service_is_not_found() {
    let fixture = Fixture::new(TranslateConfig::default());

    let (rc, reply) = fixture.get_service_handle("nope");

    assert_eq!(rc, IpcError::NotFound(PortName::new("nope").unwrap()).to_rc());
    assert_eq!(reply, [make_header(0x0005, 1, 0).unwrap(), rc.to_raw(), 0, 0, 0]);
    assert_eq!(fixture.kernel.handle_count(), 0);
}

#[test]
fn kernel_ports_are_not_brokered() {
    let fixture = Fixture::new(TranslateConfig::default());

    let (rc, _) = fixture.get_service_handle(SRV_PORT_NAME);

    assert_eq!(rc.description(), 1018);
}

#[test]
fn oversized_name_is_rejected() {
    let fixture = Fixture::new(TranslateConfig::default());

    let (rc, _) = fixture.get_service_handle("much-too-long");

    assert_eq!(rc, SrvError::InvalidNameSize(13).to_rc());
}

#[test]
fn register_client_records_calling_pid() {
    let manager = Arc::new(ServiceManager::new());
    let srv = install(&manager).unwrap();
    let session = manager.connect_to_named_port(SRV_PORT_NAME).unwrap();
    let kernel = HostKernel::new(ProcessId::from_raw(CLIENT_PID));

    let mut memory = HostMemory::new(COMMAND_BUFFER_WORDS);
    memory.write_word(0, make_header(0x0001, 0, 1).unwrap());
    memory.write_word(4, calling_pid_desc());

    let rc = session.handle_sync_request_in(&kernel, &mut memory);

    assert!(rc.is_success());
    assert_eq!(&memory.words()[..2], &[make_header(0x0001, 1, 0).unwrap(), 0]);
    assert_eq!(srv.service().clients(), [ProcessId::from_raw(CLIENT_PID)]);
}

#[test]
fn register_client_without_pid_fails() {
    let fixture = Fixture::new(TranslateConfig::default());

    let (rc, _) = fixture.call(&fixture.srv, &[make_header(0x0001, 0, 0).unwrap()]);

    assert_eq!(rc, SrvError::MissingProcessId.to_rc());
}

#[test]
fn known_unimplemented_commands_fail() {
    let fixture = Fixture::new(TranslateConfig::default());

    for command_id in [0x0002, 0x0003, 0x0004] {
        let (rc, reply) = fixture.call(&fixture.srv, &[make_header(command_id, 1, 0).unwrap(), 5]);

        let expected = IpcError::UnimplementedFunction { command_id }.to_rc();
        assert_eq!(rc, expected);
        assert_eq!(reply, [make_header(command_id, 1, 0).unwrap(), expected.to_raw()]);
    }
}

#[test]
fn strict_policy_rejects_unknown_descriptors() {
    let fixture = Fixture::new(TranslateConfig::strict());

    let request = [make_header(0x0001, 0, 1).unwrap(), 0x0000_0001];
    let (rc, _) = fixture.call(&fixture.srv, &request);

    assert_eq!(rc.description(), 48);
    assert!(fixture.manager.lookup(Namespace::Kernel, SRV_PORT_NAME).is_some());
}
