//! Fuzz target: `Packet::decode` and `TransferReassembler::feed`
//!
//! Splits the input into frames on a length prefix and drives them through
//! the peer-side decoder.  Neither may panic, and a rebuilt transfer must
//! hold exactly the element count its START announced.
//!
//! cargo fuzz run fuzz_packet_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use trichter::transfer::packet::Packet;
use trichter::transfer::reassembly::TransferReassembler;

fuzz_target!(|data: &[u8]| {
    let mut peer = TransferReassembler::new();
    let mut announced = None;
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let n = usize::from(len).min(tail.len());
        let (frame, next) = tail.split_at(n);
        rest = next;

        if let Ok(Packet::Start { count, .. }) = Packet::decode(frame) {
            announced = Some(count);
        }
        if let Ok(Some(transfer)) = peer.feed(frame) {
            let count = announced.take().expect("END without START");
            assert_eq!(transfer.timestamps.len(), usize::from(count));
        }
    }
});
