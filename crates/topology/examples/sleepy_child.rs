//! Sleepy Child Walkthrough
//!
//! Attaches a sleepy child to a router's topology table, buffers two
//! messages for it and releases them one data poll at a time, with one
//! failed transmit along the way.
//!
//! Run with: RUST_LOG=debug cargo run --example sleepy_child

use meshlink_core::{logging, Config, DeviceMode, ExtAddress, Rloc16};
use meshlink_topology::{
    AttachCompletion, Challenge, DeliveryOutcome, FrameClass, FrameSecurity, TopologyTable,
    TxResult,
};
use std::cell::Cell;

/// Outgoing MAC frame counter of this node
struct MacSecurity {
    counter: Cell<u32>,
}

impl FrameSecurity for MacSecurity {
    fn frame_counter(&self) -> u32 {
        let value = self.counter.get();
        self.counter.set(value + 1);
        value
    }

    fn key_id(&self) -> u8 {
        1
    }
}

fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::default_config();
    let security = MacSecurity {
        counter: Cell::new(1000),
    };
    let mut table: TopologyTable<String> = TopologyTable::new(&config)?;

    // Parent Request -> Child ID Request -> attached
    let ext = ExtAddress::new([0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
    let handle = table.allocate_child(ext)?;
    let child = table.child_mut(handle)?;
    child.begin_attach(Challenge::new(&[1, 2, 3, 4, 5, 6, 7, 8])?, Challenge::new(&[9; 8])?, 0)?;
    child.progress_child_id_request(Challenge::new(&[7; 8])?, 50)?;
    child.complete_attach(
        AttachCompletion {
            rloc16: Rloc16::from_child(0, 1),
            link_frame_counter: 10,
            mle_frame_counter: 3,
            key_sequence: 0,
        },
        &[],
        100,
    )?;
    child.set_mode(DeviceMode::from_bits(DeviceMode::SECURE_DATA_REQUESTS));
    child.set_timeout_secs(240);
    println!("child {} attached as {}", ext, Rloc16::from_child(0, 1));

    for text in ["network data update", "address notification"] {
        let outcome = table
            .enqueue_indirect(handle, text.to_string(), &security)
            .map_err(|rejected| rejected.error)?;
        println!("enqueued {:?}: {:?}", text, outcome);
    }

    let mut now = 1_000;
    let mut fail_next = true;
    loop {
        now += 500;
        // Each poll is a secured link frame from the child.
        let counter = 10 + (now / 500) as u32;
        table.accept_frame(handle.into(), FrameClass::Link, counter, 0, now, Some(-72))?;

        let Some(frame) = table.handle_data_poll(handle)? else {
            println!("poll at {} ms: nothing pending", now);
            break;
        };
        println!(
            "poll at {} ms: sending {:?} seq={} fc={} attempt={}",
            now, frame.message, frame.sequence_number, frame.frame_counter, frame.attempt
        );

        let result = if fail_next {
            fail_next = false;
            TxResult::Failure
        } else {
            TxResult::Success {
                next_fragment_offset: None,
            }
        };
        match table.handle_transmit_done(handle, result, &security)? {
            DeliveryOutcome::Delivered(message) => println!("  delivered {:?}", message),
            DeliveryOutcome::WillRetry { attempts } => {
                println!("  no ack, attempt {} failed", attempts)
            }
            other => println!("  {:?}", other),
        }
    }

    let child = table.child(handle)?;
    println!(
        "link quality {:?}, average rss {:?} dBm",
        child.neighbor().link_quality(),
        child.neighbor().link_info().average_rss()
    );
    println!("stats: {}", serde_json::to_string(table.stats())?);
    Ok(())
}
