//! Die firmware - Main entry point
//!
//! 1. Open the dataset partition and validate it (defaults if needed)
//! 2. Dispatch inbound BLE messages to the transfer protocol
//! 3. Drain the outbound queue to the BLE notify characteristic

#[cfg(target_os = "espidf")]
fn main() {
    firmware::run();
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("{}: build for the ESP-IDF target", die_firmware::VERSION);
}

#[cfg(target_os = "espidf")]
mod firmware {
    use esp_idf_svc::hal::delay::FreeRtos;

    use die_firmware::config::FirmwareConfig;
    use die_firmware::hal::PartitionFlash;
    use die_firmware::queue::{MessageQueue, OutboundQueue};
    use die_firmware::transfer::{ProgrammingEvent, TransferProtocol};
    use die_firmware::DatasetStore;

    /// Messages to the app. Filled from task and BLE callback context.
    static OUTBOUND: OutboundQueue = OutboundQueue::new();

    /// Messages from the app, pushed by the BLE write callback.
    pub static INBOUND: MessageQueue<512> = MessageQueue::new();

    /// Main loop period.
    const TICK_MS: u32 = 5;

    fn on_programming(_token: usize, event: ProgrammingEvent) {
        log::info!("Programming event: {:?}", event);
    }

    pub fn run() {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
        log::info!("[INIT] {}", die_firmware::VERSION);

        let flash = match PartitionFlash::open(c"dataset") {
            Ok(flash) => flash,
            Err(e) => {
                log::error!("[INIT] Dataset partition: {}", e);
                return;
            }
        };
        let mut store = match DatasetStore::new(flash, FirmwareConfig::DEFAULT) {
            Ok(store) => store,
            Err(e) => {
                log::error!("[INIT] Flash config: {}", e);
                return;
            }
        };

        let mut protocol = TransferProtocol::new(&OUTBOUND);
        if let Err(e) = protocol.register_listener(0, on_programming) {
            log::warn!("[INIT] {}", e);
        }
        if let Err(e) = protocol.start_up(&mut store) {
            log::error!("[INIT] Dataset startup failed: {}", e);
        }
        while protocol.is_busy() {
            protocol.poll(&mut store);
        }
        store.log_layout();
        log::info!("[INIT] Dataset ready, hash=0x{:08x}", store.hash());

        let mut inbound = [0u8; 512];
        loop {
            while let Some(len) = INBOUND.peek_next(|msg| {
                inbound[..msg.len()].copy_from_slice(msg);
                msg.len()
            }) {
                INBOUND.dequeue();
                if let Err(e) = protocol.handle_message(&mut store, &inbound[..len]) {
                    log::warn!("Message rejected: {} ({})", e, e.code());
                }
            }

            protocol.poll(&mut store);

            while let Some(kind) = OUTBOUND.peek_next(|msg| msg[0]) {
                // BLE notify goes here once the stack is brought up.
                log::debug!("BLE notify: message type {}", kind);
                OUTBOUND.dequeue();
            }

            if OUTBOUND.dropped() > 0 {
                log::warn!("Outbound queue dropped {} messages", OUTBOUND.dropped());
                OUTBOUND.debug_dump();
                OUTBOUND.reset_dropped();
            }

            FreeRtos::delay_ms(TICK_MS);
        }
    }
}
