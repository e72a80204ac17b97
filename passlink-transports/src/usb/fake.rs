//! A security key living in memory, answering CTAPHID the way real keys do.
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use passlink_types::cbor::{MapBuilder, Value};

use super::{Direction, UsbDevice, UsbEndpoint, UsbInterface, FIDO_REPORT_DESCRIPTOR_PREFIX};
use crate::{
    hid::{Command, Message, MessageReader, BROADCAST_CHANNEL, DEFAULT_PACKET_SIZE},
    ConnectionError,
};

pub(crate) const KEY_CHANNEL: u32 = 0x1122_3344;

type ApduHandler = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

pub(crate) struct FakeKey {
    init_capabilities: u8,
    wrong_nonce: bool,
    noise: bool,
    cbor_status: u8,
    descriptor: Vec<u8>,
    apdu: ApduHandler,
    pub(crate) claimed: AtomicBool,
    pub(crate) mute: AtomicBool,
    reader: Mutex<MessageReader>,
    outbox: Mutex<VecDeque<Vec<u8>>>,
}

fn version_only(apdu: &[u8]) -> Vec<u8> {
    match apdu.get(1) {
        Some(0x03) => b"U2F_V2\x90\x00".to_vec(),
        _ => vec![0x6d, 0x00],
    }
}

impl FakeKey {
    /// A key without CBOR support.
    pub(crate) fn u2f() -> Self {
        Self {
            init_capabilities: 0x00,
            wrong_nonce: false,
            noise: false,
            cbor_status: 0x00,
            descriptor: [&FIDO_REPORT_DESCRIPTOR_PREFIX[..], &[0xa1, 0x01, 0x09, 0x20]].concat(),
            apdu: Box::new(version_only),
            claimed: AtomicBool::new(false),
            mute: AtomicBool::new(false),
            reader: Mutex::new(MessageReader::default()),
            outbox: Mutex::new(VecDeque::new()),
        }
    }

    /// A FIDO 2.1 key with a PIN set that also speaks U2F and winks.
    pub(crate) fn ctap2() -> Self {
        Self {
            init_capabilities: 0x05,
            ..Self::u2f()
        }
    }

    pub(crate) fn with_wrong_nonce(mut self) -> Self {
        self.wrong_nonce = true;
        self
    }

    pub(crate) fn with_noise(mut self) -> Self {
        self.noise = true;
        self
    }

    pub(crate) fn with_cbor_status(mut self, status: u8) -> Self {
        self.cbor_status = status;
        self
    }

    pub(crate) fn with_descriptor(mut self, descriptor: Vec<u8>) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub(crate) fn with_apdu_handler(
        mut self,
        handler: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.apdu = Box::new(handler);
        self
    }

    pub(crate) fn interface(&self) -> UsbInterface {
        UsbInterface {
            number: 1,
            class: super::HID_CLASS,
            endpoints: vec![
                UsbEndpoint {
                    address: 0x81,
                    direction: Direction::In,
                    interrupt: true,
                    max_packet_size: DEFAULT_PACKET_SIZE,
                },
                UsbEndpoint {
                    address: 0x01,
                    direction: Direction::Out,
                    interrupt: true,
                    max_packet_size: DEFAULT_PACKET_SIZE,
                },
            ],
        }
    }

    fn get_info(&self) -> Vec<u8> {
        if self.cbor_status != 0 {
            return vec![self.cbor_status];
        }
        let body = MapBuilder::new()
            .insert(
                0x01,
                Value::Array(vec!["FIDO_2_0".into(), "FIDO_2_1".into()]),
            )
            .insert(0x03, vec![0x42u8; 16])
            .insert(
                0x04,
                MapBuilder::new()
                    .insert("rk", true)
                    .insert("clientPin", true)
                    .build(),
            )
            .to_vec()
            .unwrap();
        [vec![0x00], body].concat()
    }

    fn respond(&self, request: Message) -> Vec<Message> {
        let reply = |command, payload: Vec<u8>| Message::new(KEY_CHANNEL, command, payload);
        let response = match request.command {
            Command::Init => {
                let mut nonce = request.payload.clone();
                if self.wrong_nonce {
                    nonce[0] ^= 0xff;
                }
                let payload = [
                    nonce,
                    KEY_CHANNEL.to_be_bytes().to_vec(),
                    vec![2, 5, 4, 1, self.init_capabilities],
                ]
                .concat();
                return vec![Message::new(BROADCAST_CHANNEL, Command::Init, payload)];
            }
            Command::Msg => reply(Command::Msg, (self.apdu)(&request.payload)),
            Command::Cbor => match request.payload.split_first() {
                Some((0x04, _)) => reply(Command::Cbor, self.get_info()),
                Some((_, params)) => reply(Command::Cbor, [&[0x00u8][..], params].concat()),
                None => reply(Command::Err, vec![0x03]),
            },
            _ => reply(Command::Err, vec![0x01]),
        };
        if self.noise {
            vec![
                reply(Command::KeepAlive, vec![0x02]),
                Message::new(0xdead_beef, Command::Msg, vec![0x6a; 80]),
                reply(Command::KeepAlive, vec![0x01]),
                response,
            ]
        } else {
            vec![response]
        }
    }
}

#[async_trait::async_trait]
impl UsbDevice for FakeKey {
    async fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        length: usize,
    ) -> Result<Vec<u8>, ConnectionError> {
        assert_eq!((request_type, request, value), (0x81, 0x06, 0x2200));
        Ok(self.descriptor.iter().copied().take(length).collect())
    }

    async fn claim_interface(&self, _interface: u8) -> Result<(), ConnectionError> {
        self.claimed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn release_interface(&self, _interface: u8) -> Result<(), ConnectionError> {
        self.claimed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn write_interrupt(&self, _endpoint: u8, data: Vec<u8>) -> Result<(), ConnectionError> {
        assert_eq!(data.len(), DEFAULT_PACKET_SIZE);
        let message = self.reader.lock().unwrap().push(&data).unwrap();
        if let Some(message) = message {
            let mut outbox = self.outbox.lock().unwrap();
            for response in self.respond(message) {
                outbox.extend(response.to_packets(DEFAULT_PACKET_SIZE).unwrap());
            }
        }
        Ok(())
    }

    async fn read_interrupt(
        &self,
        _endpoint: u8,
        _length: usize,
    ) -> Result<Vec<u8>, ConnectionError> {
        let next = if self.mute.load(Ordering::SeqCst) {
            None
        } else {
            self.outbox.lock().unwrap().pop_front()
        };
        match next {
            Some(packet) => Ok(packet),
            None => std::future::pending().await,
        }
    }
}
