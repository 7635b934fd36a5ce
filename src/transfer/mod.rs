//! Module: transfer
//!
//! Purpose: Replace the flash dataset with one streamed from the app.
//!
//! Architecture:
//! ```text
//! TransferAnimSet ─► Begin ─► Erasing ─► Ack ─► StreamingPayload ─► WritingHeader
//!                                                                      │
//!                     Finished ◄─ SelfHealing ◄─ invalid ◄─ Validating ◄┘
//!                        ▲                                     │ valid
//!                        └─────────────────────────────────────┘
//! ```
//! - Every flash operation is started with `begin_*` and picked up by
//!   [`TransferProtocol::poll`], one in flight at a time
//! - Every failure path goes through the same finish step: summary refresh,
//!   session drop, Finished message, End notification
//! - The payload is written before the header; the header write is the commit
//! - The payload arrives in order: the header is only written once every
//!   byte from 0 to the payload size has landed
//!
//! Safety: The protocol is driven from a single task. The outbox may be
//! shared with interrupt context (see [`crate::queue`]).

mod listeners;
mod stats;

pub use listeners::{
    ListenerError, Listeners, ProgrammingEvent, ProgrammingHandler, TransferOutcome,
};
pub use stats::{TransferStats, TransferStatsSnapshot};

use alloc::boxed::Box;
use alloc::vec::Vec;

use thiserror::Error;

use crate::dataset::{default_dataset, BuildError, DatasetLayout, DatasetShape, DatasetStore};
use crate::flash::{FlashCompletion, FlashDriver, FlashError};
use crate::messages::{self, MessageError, MessageType, Outbox};

/// Transfer failures reported to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransferError {
    /// T01: A session is already running
    #[error("T01: transfer already in progress")]
    Busy,
    /// T02: Inbound message could not be decoded
    #[error("T02: {0}")]
    Message(#[from] MessageError),
    /// T03: Dataset does not fit the flash region
    #[error("T03: dataset needs {needed} bytes, region holds {available}")]
    TooLarge { needed: u32, available: u32 },
    /// T04: Flash driver error
    #[error("T04: {0}")]
    Flash(#[from] FlashError),
    /// T05: Payload chunk outside the streaming phase
    #[error("T05: not receiving payload")]
    NotStreaming,
    /// T06: Payload chunk past the announced payload size
    #[error("T06: chunk 0x{offset:x}+{len} outside payload of {size} bytes")]
    ChunkOutOfRange { offset: u32, len: u32, size: u32 },
    /// T07: Default dataset could not be built
    #[error("T07: {0}")]
    Defaults(#[from] BuildError),
    /// T08: Ack could not be queued
    #[error("T08: outbound queue full")]
    OutboxFull,
    /// T09: Payload chunk past the next expected offset
    #[error("T09: chunk at 0x{offset:x}, expected 0x{expected:x}")]
    ChunkOutOfOrder { offset: u32, expected: u32 },
}

impl TransferError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Busy => "T01",
            Self::Message(_) => "T02",
            Self::TooLarge { .. } => "T03",
            Self::Flash(_) => "T04",
            Self::NotStreaming => "T05",
            Self::ChunkOutOfRange { .. } => "T06",
            Self::Defaults(_) => "T07",
            Self::OutboxFull => "T08",
            Self::ChunkOutOfOrder { .. } => "T09",
        }
    }
}

/// Externally visible protocol phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    Erasing,
    StreamingPayload,
    WritingHeader,
    SelfHealing,
    /// Session aborted, waiting for the flash operation in flight.
    Aborting,
}

/// Staging data of one session. Created at Begin, dropped at Finished.
struct Session {
    layout: DatasetLayout,
    /// Payload bytes confirmed written, all of `0..written`.
    written: u32,
    /// Length of the chunk write in flight, if any.
    in_flight: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HealStep {
    Erasing,
    WritingPayload,
    WritingHeader,
}

/// Default dataset being programmed.
struct Heal {
    step: HealStep,
    /// Boot-time heal runs outside any session: no messages, no listeners.
    at_startup: bool,
    layout: DatasetLayout,
    payload: Vec<u8>,
}

enum State {
    Idle,
    Erasing,
    StreamingPayload,
    WritingHeader,
    SelfHealing(Box<Heal>),
    Aborting,
}

/// Dataset transfer state machine.
///
/// Drive it with [`handle_message`](Self::handle_message) for inbound
/// requests, [`on_payload_chunk`](Self::on_payload_chunk) for bulk data and
/// [`poll`](Self::poll) from the main loop to pick up flash completions.
pub struct TransferProtocol<'a, O: Outbox> {
    outbox: &'a O,
    state: State,
    session: Option<Box<Session>>,
    listeners: Listeners,
    stats: TransferStats,
}

impl<'a, O: Outbox> TransferProtocol<'a, O> {
    pub fn new(outbox: &'a O) -> Self {
        Self {
            outbox,
            state: State::Idle,
            session: None,
            listeners: Listeners::new(),
            stats: TransferStats::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> TransferPhase {
        match self.state {
            State::Idle => TransferPhase::Idle,
            State::Erasing => TransferPhase::Erasing,
            State::StreamingPayload => TransferPhase::StreamingPayload,
            State::WritingHeader => TransferPhase::WritingHeader,
            State::SelfHealing(_) => TransferPhase::SelfHealing,
            State::Aborting => TransferPhase::Aborting,
        }
    }

    /// True while a session or a self-heal is running.
    #[inline]
    pub fn is_busy(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// True while a session object exists.
    #[inline]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    #[inline]
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    #[inline]
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Register a programming event listener.
    pub fn register_listener(
        &mut self,
        token: usize,
        handler: ProgrammingHandler,
    ) -> Result<(), ListenerError> {
        self.listeners.register(token, handler)
    }

    pub fn unregister_listener(&mut self, handler: ProgrammingHandler) -> bool {
        self.listeners.unregister_handler(handler)
    }

    pub fn unregister_listener_token(&mut self, token: usize) -> bool {
        self.listeners.unregister_token(token)
    }

    /// Boot-time check: validate flash, program defaults if needed.
    ///
    /// When defaults are needed the protocol is left busy; keep calling
    /// [`poll`](Self::poll) until [`is_busy`](Self::is_busy) clears. The
    /// summary is refreshed once the dataset is settled.
    pub fn start_up<F: FlashDriver>(&mut self, store: &mut DatasetStore<F>) -> Result<(), TransferError> {
        if self.is_busy() {
            return Err(TransferError::Busy);
        }
        if store.check_valid() {
            store.refresh_summary();
            return Ok(());
        }
        log::info!("Dataset not valid, programming default");
        self.start_self_heal(store, true)
    }

    /// Dispatch an inbound BLE message.
    pub fn handle_message<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        bytes: &[u8],
    ) -> Result<(), TransferError> {
        match messages::message_type(bytes)? {
            MessageType::TransferAnimSet => {
                let shape = messages::decode_transfer_anim_set(bytes)?;
                self.begin(store, &shape)
            }
            other => Err(MessageError::UnknownType(other as u8).into()),
        }
    }

    /// Start a session for a dataset of the given shape.
    ///
    /// Rejected without side effects while another session runs. Any other
    /// error has already finished the session (Finished sent, End notified).
    pub fn begin<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        shape: &DatasetShape,
    ) -> Result<(), TransferError> {
        if self.is_busy() {
            log::warn!("Transfer request ignored, session in progress");
            return Err(TransferError::Busy);
        }

        log::info!("Received request to download new dataset");
        self.listeners.notify(ProgrammingEvent::Begin);
        self.stats.record_open();

        let layout = DatasetLayout::from_shape(shape);
        log::debug!("Dataset to be received:");
        layout.log();
        self.session = Some(Box::new(Session {
            layout,
            written: 0,
            in_flight: None,
        }));

        let config = *store.config();
        let flash_size = store.flash().flash_byte_size(layout.total_size());
        let page_count = store.flash().bytes_to_pages(flash_size);
        log::debug!("totalSize: 0x{:04x}", layout.total_size());
        log::debug!("flashSize: 0x{:04x}", flash_size);
        log::debug!("pageAddress: 0x{:08x}", config.dataset_base);
        log::debug!("dataAddress: 0x{:08x}", config.payload_base());
        log::debug!("pageCount: {}", page_count);

        if flash_size > config.dataset_region_size {
            log::error!(
                "Dataset too large: 0x{:x} bytes, region holds 0x{:x}",
                flash_size,
                config.dataset_region_size
            );
            self.finish(store, TransferOutcome::Failed);
            return Err(TransferError::TooLarge {
                needed: flash_size,
                available: config.dataset_region_size,
            });
        }

        if let Err(e) = store.flash_mut().begin_erase(config.dataset_base, page_count) {
            log::error!("Error erasing flash: {}", e);
            self.finish(store, TransferOutcome::Failed);
            return Err(e.into());
        }
        self.state = State::Erasing;
        Ok(())
    }

    /// Write one chunk of streamed payload at `offset` from the payload base.
    ///
    /// Only one chunk may be in flight: wait for [`poll`](Self::poll) to
    /// consume its completion before passing the next. A chunk that arrives
    /// too early is refused with `Flash(Busy)` and the session continues.
    ///
    /// Chunks must continue where the written payload ends. Bytes that are
    /// already written are skipped, so a resent chunk is accepted without
    /// touching flash. A chunk that leaves a gap is refused with
    /// `ChunkOutOfOrder` and the session continues.
    pub fn on_payload_chunk<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        offset: u32,
        data: &[u8],
    ) -> Result<(), TransferError> {
        if !matches!(self.state, State::StreamingPayload) {
            return Err(TransferError::NotStreaming);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(TransferError::NotStreaming);
        };
        if session.in_flight.is_some() {
            return Err(FlashError::Busy.into());
        }

        let size = session.layout.payload_size;
        let len = data.len() as u32;
        if offset.checked_add(len).map_or(true, |end| end > size) {
            log::error!("Payload chunk 0x{:x}+{} outside payload", offset, len);
            self.finish(store, TransferOutcome::Failed);
            return Err(TransferError::ChunkOutOfRange { offset, len, size });
        }

        let written = session.written;
        if offset > written {
            log::warn!("Payload chunk at 0x{:x}, expected 0x{:x}", offset, written);
            return Err(TransferError::ChunkOutOfOrder {
                offset,
                expected: written,
            });
        }
        let skip = (written - offset) as usize;
        if skip >= data.len() {
            log::debug!("Payload chunk 0x{:x}+{} already written", offset, len);
            return Ok(());
        }
        let data = &data[skip..];

        let address = store.config().payload_base() + written;
        match store.flash_mut().begin_write(address, data) {
            Ok(()) => {
                session.in_flight = Some(data.len() as u32);
                Ok(())
            }
            Err(FlashError::Busy) => Err(FlashError::Busy.into()),
            Err(e) => {
                log::error!("Error transferring dataset: {}", e);
                self.finish(store, TransferOutcome::Failed);
                Err(e.into())
            }
        }
    }

    /// The bulk transfer layer gave up (link lost, app cancelled).
    ///
    /// Only acts before the commit. If a flash operation is in flight the
    /// session stays open in the Aborting phase until [`poll`](Self::poll)
    /// picks up its completion, then finishes as failed.
    pub fn on_payload_aborted<F: FlashDriver>(&mut self, store: &mut DatasetStore<F>) {
        let in_flight = match self.state {
            State::Erasing => true,
            State::StreamingPayload => self.session.as_ref().is_some_and(|s| s.in_flight.is_some()),
            State::Idle | State::Aborting => return,
            State::WritingHeader | State::SelfHealing(_) => {
                log::debug!("Payload abort ignored, dataset already committing");
                return;
            }
        };
        log::error!("Error transferring dataset, aborted");
        if in_flight {
            self.state = State::Aborting;
        } else {
            self.finish(store, TransferOutcome::Failed);
        }
    }

    /// Pick up a finished flash operation and advance.
    pub fn poll<F: FlashDriver>(&mut self, store: &mut DatasetStore<F>) {
        if !self.is_busy() {
            return;
        }
        let Some(result) = store.flash_mut().poll_completion() else {
            return;
        };

        match core::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {}
            State::Erasing => self.on_erased(store, result),
            State::StreamingPayload => self.on_chunk_written(store, result),
            State::WritingHeader => self.on_header_written(store, result),
            State::SelfHealing(heal) => self.on_heal_step(store, heal, result),
            State::Aborting => {
                if let Err(e) = result {
                    log::warn!("Flash operation failed after abort: {}", e);
                }
                self.finish(store, TransferOutcome::Failed);
            }
        }
    }

    // --- Private methods ---

    fn on_erased<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        result: Result<FlashCompletion, FlashError>,
    ) {
        if let Err(e) = result {
            log::error!("Error erasing flash: {}", e);
            self.finish(store, TransferOutcome::Failed);
            return;
        }
        log::debug!("Done erasing");

        if !self.outbox.send_control(MessageType::TransferAnimSetAck) {
            log::error!("{}", TransferError::OutboxFull);
            self.finish(store, TransferOutcome::Failed);
            return;
        }

        self.state = State::StreamingPayload;
        if self.session.as_ref().is_some_and(|s| s.layout.payload_size == 0) {
            self.write_header(store);
        }
    }

    fn on_chunk_written<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        result: Result<FlashCompletion, FlashError>,
    ) {
        if let Err(e) = result {
            log::error!("Error programming dataset to flash: {}", e);
            self.finish(store, TransferOutcome::Failed);
            return;
        }
        self.state = State::StreamingPayload;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let landed = session.in_flight.take().unwrap_or(0);
        session.written += landed;
        if session.written >= session.layout.payload_size {
            log::debug!(
                "Finished flashing dataset payload (0x{:04x} bytes), writing header",
                session.written
            );
            self.write_header(store);
        }
    }

    fn write_header<F: FlashDriver>(&mut self, store: &mut DatasetStore<F>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let base = store.config().dataset_base;
        match store.flash_mut().begin_write(base, session.layout.header.as_bytes()) {
            Ok(()) => self.state = State::WritingHeader,
            Err(e) => {
                log::error!("Error writing dataset header: {}", e);
                self.finish(store, TransferOutcome::Failed);
            }
        }
    }

    fn on_header_written<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        result: Result<FlashCompletion, FlashError>,
    ) {
        if let Err(e) = result {
            log::error!("Error programming dataset to flash: {}", e);
            self.finish(store, TransferOutcome::Failed);
            return;
        }
        log::info!("Dataset written to flash!");

        if store.check_valid() {
            self.finish(store, TransferOutcome::Committed);
        } else {
            log::error!("Dataset is not valid, reprogramming defaults!");
            if let Err(e) = self.start_self_heal(store, false) {
                log::error!("Could not program defaults: {}", e);
            }
        }
    }

    fn start_self_heal<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        at_startup: bool,
    ) -> Result<(), TransferError> {
        let result = self.begin_self_heal(store, at_startup);
        if result.is_err() {
            self.end_self_heal(store, at_startup, false);
        }
        result
    }

    fn begin_self_heal<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        at_startup: bool,
    ) -> Result<(), TransferError> {
        self.stats.record_self_heal();
        let (layout, payload) = default_dataset()?;

        let config = *store.config();
        let flash_size = store.flash().flash_byte_size(layout.total_size());
        if flash_size > config.dataset_region_size {
            return Err(TransferError::TooLarge {
                needed: flash_size,
                available: config.dataset_region_size,
            });
        }
        let pages = store.flash().bytes_to_pages(flash_size);
        store.flash_mut().begin_erase(config.dataset_base, pages)?;

        self.state = State::SelfHealing(Box::new(Heal {
            step: HealStep::Erasing,
            at_startup,
            layout,
            payload,
        }));
        Ok(())
    }

    fn on_heal_step<F: FlashDriver>(
        &mut self,
        store: &mut DatasetStore<F>,
        mut heal: Box<Heal>,
        result: Result<FlashCompletion, FlashError>,
    ) {
        if let Err(e) = result {
            log::error!("Error programming default dataset: {}", e);
            self.end_self_heal(store, heal.at_startup, false);
            return;
        }

        let config = *store.config();
        let next = match heal.step {
            HealStep::Erasing if heal.payload.is_empty() => store
                .flash_mut()
                .begin_write(config.dataset_base, heal.layout.header.as_bytes())
                .map(|()| HealStep::WritingHeader),
            HealStep::Erasing => store
                .flash_mut()
                .begin_write(config.payload_base(), &heal.payload)
                .map(|()| HealStep::WritingPayload),
            HealStep::WritingPayload => store
                .flash_mut()
                .begin_write(config.dataset_base, heal.layout.header.as_bytes())
                .map(|()| HealStep::WritingHeader),
            HealStep::WritingHeader => {
                let valid = store.check_valid();
                if !valid {
                    log::error!("Default dataset failed validation");
                }
                self.end_self_heal(store, heal.at_startup, valid);
                return;
            }
        };

        match next {
            Ok(step) => {
                heal.step = step;
                self.state = State::SelfHealing(heal);
            }
            Err(e) => {
                log::error!("Error programming default dataset: {}", e);
                self.end_self_heal(store, heal.at_startup, false);
            }
        }
    }

    fn end_self_heal<F: FlashDriver>(&mut self, store: &mut DatasetStore<F>, at_startup: bool, ok: bool) {
        if at_startup {
            self.state = State::Idle;
            store.refresh_summary();
            return;
        }
        let outcome = if ok {
            TransferOutcome::RestoredDefaults
        } else {
            TransferOutcome::Failed
        };
        self.finish(store, outcome);
    }

    /// Common exit of every session path.
    fn finish<F: FlashDriver>(&mut self, store: &mut DatasetStore<F>, outcome: TransferOutcome) {
        self.state = State::Idle;
        store.refresh_summary();

        if self.session.take().is_some() {
            self.stats.record_close(outcome == TransferOutcome::Committed);
        }
        if !self.outbox.send_control(MessageType::TransferAnimSetFinished) {
            log::warn!("Finished message dropped, outbound queue full");
        }
        self.listeners.notify(ProgrammingEvent::End(outcome));
    }
}
