//! MIDI input: frame decoding and the device connection lifecycle.
//!
//! Decoding is deliberately boundary-tolerant. Hardware surfaces emit plenty
//! of traffic we don't care about (clock, sysex, active sensing) and the
//! occasional truncated frame; anything unrecognized is counted and dropped,
//! never an error.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use midir::{Ignore, MidiInput, MidiInputConnection};

use crate::core::prelude::*;

/// A decoded control-surface message. Produced once per raw frame and
/// immutable from there on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    NoteOn { note: u8, velocity: u8, channel: u8 },
    NoteOff { note: u8, velocity: u8, channel: u8 },
    ControlChange { controller: u8, value: u8, channel: u8 },
    PitchBend { value: f32, channel: u8 },
    ChannelPressure { value: f32, channel: u8 },
}

impl Event {
    pub fn channel(&self) -> u8 {
        match self {
            Event::NoteOn { channel, .. }
            | Event::NoteOff { channel, .. }
            | Event::ControlChange { channel, .. }
            | Event::PitchBend { channel, .. }
            | Event::ChannelPressure { channel, .. } => *channel,
        }
    }

    /// True only for a genuine attack. [`decode`] already folds zero-velocity
    /// note-ons into [`Event::NoteOff`], so this is a plain variant check.
    pub fn is_note_on(&self) -> bool {
        matches!(self, Event::NoteOn { .. })
    }

    /// Control value scaled to the unit interval, for events that carry one.
    pub fn unit_value(&self) -> Option<f32> {
        match self {
            Event::ControlChange { value, .. } => {
                Some(*value as f32 / 127.0)
            }
            Event::NoteOn { velocity, .. } => Some(*velocity as f32 / 127.0),
            Event::PitchBend { value, .. }
            | Event::ChannelPressure { value, .. } => Some(*value),
            Event::NoteOff { .. } => None,
        }
    }
}

/// Decode a 1-3 byte frame into an [`Event`]. Returns `None` for anything
/// malformed or unsupported (callers count these, see
/// [`DeviceSession::decode_failures`]).
///
/// Two wire conventions worth preserving: a `0x90` note-on with velocity 0
/// is a release and decodes as [`Event::NoteOff`]; pitch bend is a 14-bit
/// value reconstructed as `((msb << 7) | lsb) / 16384`, clamped to [0, 1].
pub fn decode(frame: &[u8]) -> Option<Event> {
    let status = *frame.first()?;
    let channel = status & 0x0F;

    let data = |index: usize| -> Option<u8> {
        let byte = *frame.get(index)?;
        // Data bytes never have the high bit set
        ternary!(byte & 0x80 == 0, Some(byte), None)
    };

    match status & 0xF0 {
        0x80 => Some(Event::NoteOff {
            note: data(1)?,
            velocity: data(2)?,
            channel,
        }),
        0x90 => {
            let note = data(1)?;
            let velocity = data(2)?;
            if velocity > 0 {
                Some(Event::NoteOn {
                    note,
                    velocity,
                    channel,
                })
            } else {
                Some(Event::NoteOff {
                    note,
                    velocity,
                    channel,
                })
            }
        }
        0xB0 => Some(Event::ControlChange {
            controller: data(1)?,
            value: data(2)?,
            channel,
        }),
        0xD0 => Some(Event::ChannelPressure {
            value: data(1)? as f32 / 127.0,
            channel,
        }),
        0xE0 => {
            let lsb = data(1)? as u16;
            let msb = data(2)? as u16;
            let value = (((msb << 7) | lsb) as f32 / 16384.0).clamp(0.0, 1.0);
            Some(Event::PitchBend { value, channel })
        }
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub name: String,
}

pub type FrameCallback = Arc<dyn Fn(u64, &[u8]) + Send + Sync>;

pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// The narrow device collaborator the session depends on. The production
/// impl is [`MidirIo`]; tests supply their own. `on_disconnect` fires when
/// the backend loses the opened port after `open` has returned.
pub trait DeviceIo: Send {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, Box<dyn Error>>;
    fn open(
        &mut self,
        descriptor: &DeviceDescriptor,
        on_frame: FrameCallback,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), Box<dyn Error>>;
    fn close(&mut self);
}

/// midir-backed [`DeviceIo`]. The input connection is owned by a dedicated
/// thread that parks after connecting; unparking it drops the connection.
pub struct MidirIo {
    client_name: String,
    connection: Arc<Mutex<Option<MidiInputConnection<()>>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MidirIo {
    pub fn new(client_name: &str) -> Self {
        Self {
            client_name: client_name.to_string(),
            connection: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }
}

impl DeviceIo for MidirIo {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, Box<dyn Error>> {
        let mut midi_in = MidiInput::new(&self.client_name)?;
        midi_in.ignore(Ignore::None);
        let mut descriptors = vec![];
        for (index, port) in midi_in.ports().iter().enumerate() {
            descriptors.push(DeviceDescriptor {
                index,
                name: midi_in.port_name(port)?,
            });
        }
        Ok(descriptors)
    }

    fn open(
        &mut self,
        descriptor: &DeviceDescriptor,
        on_frame: FrameCallback,
        on_disconnect: DisconnectCallback,
    ) -> Result<(), Box<dyn Error>> {
        self.close();

        let midi_in = MidiInput::new(&self.client_name)?;
        let port_name = descriptor.name.clone();
        let in_ports = midi_in.ports();
        let in_port = in_ports
            .iter()
            .find(|p| midi_in.port_name(p).unwrap_or_default() == port_name)
            .ok_or_else(|| {
                format!("Unable to find input port: {}", port_name)
            })?
            .clone();

        let connection = self.connection.clone();
        let client_name = self.client_name.clone();

        let handle = thread::spawn(move || {
            let conn_in = match midi_in.connect(
                &in_port,
                &client_name,
                move |stamp, message, _| {
                    trace!("MIDI message: {}, {:?}", stamp, message);
                    on_frame(stamp, message);
                },
                (),
            ) {
                Ok(conn) => conn,
                Err(e) => {
                    // `open` has already returned Ok; the port going away
                    // underneath us is a disconnect, not an open failure
                    error!("Unable to connect to {}: {}", port_name, e);
                    on_disconnect();
                    return;
                }
            };

            *connection.lock().unwrap() = Some(conn_in);
            info!("Connected: {}", port_name);

            thread::park();

            if let Some(conn) = connection.lock().unwrap().take() {
                drop(conn);
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Unparking MIDI input thread");
            handle.thread().unpark();
        }
    }
}

#[derive(Debug)]
pub enum DeviceError {
    /// No input devices present or the backend refused access.
    Unavailable,
    /// `select` called while not in the `Selecting` state.
    NotSelecting,
    InvalidSelection(usize),
    Io(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unavailable => {
                write!(f, "No MIDI input devices available")
            }
            DeviceError::NotSelecting => {
                write!(f, "No device selection in progress")
            }
            DeviceError::InvalidSelection(index) => {
                write!(f, "Device selection index {} out of range", index)
            }
            DeviceError::Io(message) => write!(f, "{}", message),
        }
    }
}

impl Error for DeviceError {}

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    /// More than one candidate input exists; the host must `select` one.
    Selecting(Vec<DeviceDescriptor>),
    Connected(DeviceDescriptor),
}

/// Owns the physical connection lifecycle and forwards every decoded
/// [`Event`] to a single subscriber, synchronously, in arrival order.
///
/// With exactly one candidate input, `connect` goes straight to
/// `Connected`; `Selecting` exists only for the multi-device case. After a
/// hot unplug the session stays `Disconnected` until the user explicitly
/// reconnects, so we never silently swap to a different device mid-session.
pub struct DeviceSession {
    io: Box<dyn DeviceIo>,
    state: ConnectionState,
    on_event: Arc<dyn Fn(Event) + Send + Sync>,
    on_disconnect: Option<DisconnectCallback>,
    decode_failures: Arc<AtomicU64>,
}

impl DeviceSession {
    pub fn new(
        io: Box<dyn DeviceIo>,
        on_event: Arc<dyn Fn(Event) + Send + Sync>,
    ) -> Self {
        Self {
            io,
            state: ConnectionState::Disconnected,
            on_event,
            on_disconnect: None,
            decode_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Install the handler invoked on hot unplug (and by the IO backend if
    /// it loses the port on its own). Typically
    /// [`ControlHub::disconnect_sink`](crate::control::hub::ControlHub::disconnect_sink).
    pub fn set_disconnect_handler(&mut self, handler: DisconnectCallback) {
        self.on_disconnect = Some(handler);
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Total raw frames dropped by the decoder since session creation.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Enumerate inputs and either connect (single candidate) or enter
    /// `Selecting` (multiple). Returns the resulting state.
    pub fn connect(&mut self) -> Result<&ConnectionState, DeviceError> {
        let candidates = self
            .io
            .enumerate()
            .map_err(|e| DeviceError::Io(e.to_string()))?;

        match candidates.len() {
            0 => {
                self.state = ConnectionState::Disconnected;
                Err(DeviceError::Unavailable)
            }
            1 => {
                let descriptor = candidates.into_iter().next().unwrap();
                self.open(descriptor)?;
                Ok(&self.state)
            }
            _ => {
                self.state = ConnectionState::Selecting(candidates);
                Ok(&self.state)
            }
        }
    }

    /// Complete a pending selection. Only valid from `Selecting`. Returns
    /// the chosen descriptor so the host can persist it as the last
    /// selected input.
    pub fn select(
        &mut self,
        index: usize,
    ) -> Result<DeviceDescriptor, DeviceError> {
        let ConnectionState::Selecting(candidates) = &self.state else {
            return Err(DeviceError::NotSelecting);
        };

        let descriptor = candidates
            .iter()
            .find(|d| d.index == index)
            .cloned()
            .ok_or(DeviceError::InvalidSelection(index))?;

        self.open(descriptor.clone())?;
        Ok(descriptor)
    }

    pub fn disconnect(&mut self) {
        self.io.close();
        self.state = ConnectionState::Disconnected;
    }

    /// Hardware unplug notification for the currently connected input.
    /// No reconnection is attempted; the installed disconnect handler
    /// fires exactly once and the session waits for explicit user action.
    pub fn on_unplugged(&mut self) {
        if matches!(self.state, ConnectionState::Connected(_)) {
            warn!("MIDI input unplugged");
            self.disconnect();
            if let Some(handler) = &self.on_disconnect {
                handler();
            }
        }
    }

    fn open(
        &mut self,
        descriptor: DeviceDescriptor,
    ) -> Result<(), DeviceError> {
        let on_event = self.on_event.clone();
        let failures = self.decode_failures.clone();

        let on_frame: FrameCallback = Arc::new(move |_stamp, frame| {
            match decode(frame) {
                Some(event) => on_event(event),
                None => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    trace!("Dropped undecodable frame: {:?}", frame);
                }
            }
        });

        let on_disconnect: DisconnectCallback = self
            .on_disconnect
            .clone()
            .unwrap_or_else(|| Arc::new(|| {}));

        self.io
            .open(&descriptor, on_frame, on_disconnect)
            .map_err(|e| DeviceError::Io(e.to_string()))?;

        self.state = ConnectionState::Connected(descriptor);
        Ok(())
    }
}

pub type PortIndexAndName = (usize, String);

pub fn list_input_ports() -> Result<Vec<PortIndexAndName>, Box<dyn Error>> {
    let mut midi_in = MidiInput::new("lattice_port_scan")?;
    midi_in.ignore(Ignore::None);
    let mut ports = vec![];
    for (i, p) in midi_in.ports().iter().enumerate() {
        ports.push((i, midi_in.port_name(p)?));
    }
    Ok(ports)
}
