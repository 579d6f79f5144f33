//! Connection management
//!
//! Owns the transport and exposes one call per device capability. Commands are
//! written from the caller's thread; replies and telemetry come back through the
//! reader loop and the [`EventSink`].
//!
//! Lifecycle:
//!
//! ```text
//! Closed --open--> Idle --reply-expecting write--> AwaitingReply --line/timeout--> Idle
//! Idle --monitor_pwm--> Monitoring --stop_monitor--> Idle
//! any --close--> Closed   (close while Monitoring stops the monitor first)
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::commands::{Command, GpioBank, Level, PwmChannel, ResponseKind};
use super::dispatcher::Dispatcher;
use super::reader::ReaderLoop;
use super::serial::{list_ports, PortInfo};
use super::session::{MonitoringSession, ReplyHandle, Session, SessionState, SharedSession};
use super::stream::CommunicationChannel;
use super::transport::Transport;
use super::{lock, ProtocolError, ACK};
use crate::events::{EventSink, LinkState};
use crate::settings::SerialSettings;

/// Outcome of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    Connected,
    Disconnected,
}

/// Device connection
pub struct Connection {
    transport: Option<Arc<Transport>>,
    settings: Option<SerialSettings>,
    session: SharedSession,
    sink: Arc<dyn EventSink>,
    reader: ReaderLoop,
}

impl Connection {
    /// Create a connection (not yet open) reporting to `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            transport: None,
            settings: None,
            session: Arc::new(Mutex::new(Session::default())),
            sink,
            reader: ReaderLoop::new(),
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// Open the serial port described by `settings`
    pub fn open(&mut self, settings: &SerialSettings) -> Result<(), ProtocolError> {
        if self.is_open() {
            return Err(ProtocolError::AlreadyOpen);
        }
        let transport = Transport::open(settings)?;
        self.attach(settings, transport);
        Ok(())
    }

    /// Open over a caller-supplied channel instead of a serial port
    pub fn open_with_channel(
        &mut self,
        settings: &SerialSettings,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<(), ProtocolError> {
        if self.is_open() {
            return Err(ProtocolError::AlreadyOpen);
        }
        settings.validate()?;
        let transport = Transport::from_channel(settings.port_name.clone(), channel)?;
        self.attach(settings, transport);
        Ok(())
    }

    fn attach(&mut self, settings: &SerialSettings, transport: Transport) {
        // Reap a reader left over from a transport that failed on its own
        self.reader.stop();
        {
            let mut session = lock(&self.session);
            session.clear();
            session.reader_active = false;
        }
        self.transport = Some(Arc::new(transport));
        self.settings = Some(settings.clone());
        info!(port = %settings.port_name, baud = %settings.baud_rate, "connected");
        self.sink.on_connection_state_changed(LinkState::Connected);
    }

    /// Close the connection. Safe to call when already closed.
    pub fn close(&mut self) -> Result<(), ProtocolError> {
        let Some(transport) = self.transport.clone() else {
            return Ok(());
        };

        if self.is_monitoring() {
            if let Err(e) = self.stop_monitor() {
                warn!(error = %e, "stopMonitor failed during close");
            }
        }

        let was_open = transport.is_open();
        self.reader.stop();
        if let Err(e) = transport.close() {
            // The reader is gone, so nothing would ever expire a pending reply
            lock(&self.session).disarm();
            return Err(e);
        }

        self.transport = None;
        lock(&self.session).clear();
        if was_open {
            info!(port = %transport.port_name(), "disconnected");
            self.sink.on_connection_state_changed(LinkState::Disconnected);
        }
        Ok(())
    }

    /// Check if the transport is open. Never blocks.
    pub fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    pub fn state(&self) -> SessionState {
        if !self.is_open() {
            return SessionState::Closed;
        }
        let mut session = lock(&self.session);
        if session.monitoring.is_some() {
            SessionState::Monitoring
        } else if session.pending_live(Instant::now()) {
            SessionState::AwaitingReply
        } else {
            SessionState::Idle
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.session).monitoring.is_some()
    }

    /// Channel under observation, if monitoring
    pub fn monitored_channel(&self) -> Option<PwmChannel> {
        lock(&self.session).monitoring.as_ref().map(|m| m.channel)
    }

    pub fn is_reader_running(&self) -> bool {
        self.reader.is_running()
    }

    /// Settings the connection was opened with
    pub fn settings(&self) -> Option<&SerialSettings> {
        self.settings.as_ref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.transport.as_ref().map_or(0, |t| t.bytes_written())
    }

    pub fn lines_read(&self) -> u64 {
        self.transport.as_ref().map_or(0, |t| t.lines_read())
    }

    fn transport(&self) -> Result<Arc<Transport>, ProtocolError> {
        match &self.transport {
            Some(t) if t.is_open() => Ok(t.clone()),
            _ => Err(ProtocolError::NotConnected),
        }
    }

    fn settings_or_default(&self) -> SerialSettings {
        self.settings.clone().unwrap_or_default()
    }

    /// Write a command line, handling the auto-close on failure
    fn write_command(&mut self, transport: &Transport, cmd: &Command) -> Result<(), ProtocolError> {
        match transport.write(&cmd.to_bytes()) {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, ProtocolError::IoFailure(_)) {
                    lock(&self.session).clear();
                    self.sink.on_connection_state_changed(LinkState::Disconnected);
                }
                Err(e)
            }
        }
    }

    /// Drop bytes nobody read, so they cannot answer the next command.
    ///
    /// Skipped while a reader is running: it routes leftovers itself.
    fn discard_stale_input(&self, transport: &Transport) -> Result<(), ProtocolError> {
        if lock(&self.session).reader_active {
            return Ok(());
        }
        transport.clear_input()
    }

    /// Make sure a reader loop is running
    fn ensure_reader(&mut self, transport: Arc<Transport>) -> Result<(), ProtocolError> {
        {
            let mut session = lock(&self.session);
            if session.reader_active {
                return Ok(());
            }
            session.reader_active = true;
        }
        let read_timeout = self.settings_or_default().read_timeout();
        let dispatcher = Dispatcher::new(self.session.clone(), self.sink.clone());
        self.reader.spawn(transport, dispatcher, read_timeout)
    }

    /// Send any command, arming whatever response handling it needs.
    ///
    /// Returns a handle for commands that expect a reply. `Ping` is rejected
    /// here; use [`ping`](Self::ping).
    pub fn send(&mut self, cmd: &Command) -> Result<Option<ReplyHandle>, ProtocolError> {
        let transport = self.transport()?;
        let window = self.settings_or_default().reply_timeout();

        match cmd.response_kind() {
            ResponseKind::Reply => {
                self.discard_stale_input(&transport)?;
                let handle = lock(&self.session).arm(cmd.to_string(), window)?;
                if let Err(e) = self.write_command(&transport, cmd) {
                    lock(&self.session).disarm();
                    return Err(e);
                }
                self.ensure_reader(transport)?;
                Ok(Some(handle))
            }
            ResponseKind::Output => {
                self.write_command(&transport, cmd)?;
                lock(&self.session).listen(Instant::now() + window);
                self.ensure_reader(transport)?;
                Ok(None)
            }
            ResponseKind::None => {
                self.write_command(&transport, cmd)?;
                Ok(None)
            }
            ResponseKind::Sync => Err(ProtocolError::invalid(format!(
                "'{}' must be sent through its synchronous call",
                cmd
            ))),
        }
    }

    fn request(&mut self, cmd: Command) -> Result<ReplyHandle, ProtocolError> {
        self.send(&cmd)?
            .ok_or_else(|| ProtocolError::invalid(format!("'{}' has no reply", cmd)))
    }

    /// Drive a GPIO pin high or low
    pub fn write_pin(
        &mut self,
        bank: GpioBank,
        pin: u8,
        level: impl Into<Level>,
    ) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::gpio_write(bank, pin, level)?)
    }

    pub fn read_pin(&mut self, bank: GpioBank, pin: u8) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::gpio_read(bank, pin)?)
    }

    /// Firmware version string
    pub fn get_version(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::Version)
    }

    pub fn help(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::Help)
    }

    /// OS heap consumption
    pub fn get_heap(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::Heap)
    }

    /// OS tick counter
    pub fn get_ticks(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::Ticks)
    }

    /// Clock tree information
    pub fn get_clk(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::Clk)
    }

    /// Task statistics
    pub fn get_stats(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::Stats)
    }

    pub fn get_rtc_time(&mut self) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::RtcGet)
    }

    pub fn set_rtc_time(&mut self, hour: u8, minute: u8, second: u8) -> Result<ReplyHandle, ProtocolError> {
        self.request(Command::rtc_set(hour, minute, second)?)
    }

    /// Set PWM frequency, then duty cycle, as two separate commands.
    ///
    /// Both values are validated before anything is sent. The device has no
    /// combined command: if the duty write fails, the new frequency is already
    /// applied. The returned handle resolves with the frequency acknowledgement;
    /// the duty acknowledgement arrives through `on_line`.
    pub fn set_pwm_freq_duty(&mut self, freq_hz: u32, duty_percent: u8) -> Result<ReplyHandle, ProtocolError> {
        let freq = Command::pwm_frequency(freq_hz)?;
        let duty = Command::pwm_duty(duty_percent)?;

        let handle = self.request(freq)?;
        let transport = self.transport()?;
        self.write_command(&transport, &duty)?;
        Ok(handle)
    }

    /// Start streaming `pwm:<level>` telemetry for `channel` (1-4)
    pub fn monitor_pwm(&mut self, channel: u8) -> Result<(), ProtocolError> {
        let channel = PwmChannel::try_from(channel)?;
        let transport = self.transport()?;

        // Armed before the write so the first samples are not missed
        lock(&self.session).monitoring = Some(MonitoringSession::new(channel));
        if let Err(e) = self.write_command(&transport, &Command::PwmMonitor(channel)) {
            lock(&self.session).monitoring = None;
            return Err(e);
        }
        info!(channel = channel.number(), "monitoring started");
        self.ensure_reader(transport)
    }

    /// Stop telemetry.
    ///
    /// The reader keeps going for one reply window so samples already in
    /// flight are reported through `on_line`, then exits on its own.
    pub fn stop_monitor(&mut self) -> Result<(), ProtocolError> {
        let transport = self.transport()?;
        self.write_command(&transport, &Command::StopMonitor)?;

        let window = self.settings_or_default().reply_timeout();
        {
            let mut session = lock(&self.session);
            session.monitoring = None;
            session.drain(Instant::now() + window);
        }
        info!("monitoring stopped");
        self.ensure_reader(transport)
    }

    /// Send a free-form console line; any output is reported through `on_line`
    pub fn send_raw(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.send(&Command::console(text)?).map(|_| ())
    }

    /// Synchronous liveness check.
    ///
    /// `Connected` when the next line is exactly `OK`, `Disconnected` on any
    /// other line or on timeout. Errors only for local conditions such as a
    /// closed transport or an active monitor.
    pub fn ping(&mut self) -> Result<PingStatus, ProtocolError> {
        match self.try_ping() {
            Ok(()) => {
                self.sink.on_connection_state_changed(LinkState::Connected);
                Ok(PingStatus::Connected)
            }
            Err(ProtocolError::Timeout) | Err(ProtocolError::InvalidResponse(_)) => {
                self.sink
                    .on_connection_state_changed(LinkState::NotResponding);
                Ok(PingStatus::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`ping`](Self::ping), but reports timeouts and wrong answers as errors
    pub fn try_ping(&mut self) -> Result<(), ProtocolError> {
        let transport = self.transport()?;
        {
            let mut session = lock(&self.session);
            if session.monitoring.is_some() {
                return Err(ProtocolError::Busy("monitoring is active"));
            }
            if session.pending_live(Instant::now()) {
                return Err(ProtocolError::Busy("a reply is pending"));
            }
        }

        // The direct read below must be the only reader
        self.reader.stop();

        transport.clear_input()?;
        self.write_command(&transport, &Command::Ping)?;

        let timeout = self.settings_or_default().ping_timeout();
        let answer = match transport.read_line(timeout) {
            Ok(answer) => answer,
            Err(e) => {
                if matches!(e, ProtocolError::IoFailure(_)) {
                    lock(&self.session).clear();
                    self.sink.on_connection_state_changed(LinkState::Disconnected);
                }
                return Err(e);
            }
        };

        match answer {
            Some(line) if line.trim() == ACK => {
                debug!("ping ok");
                Ok(())
            }
            Some(line) => {
                debug!(line = %line, "ping got unexpected answer");
                Err(ProtocolError::InvalidResponse(line))
            }
            None => {
                debug!("ping timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
