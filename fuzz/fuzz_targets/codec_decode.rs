#![no_main]

use libfuzzer_sys::fuzz_target;
use peril_codec::{CborCodec, Codec, JsonCodec};
use peril_core::events::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};

fn decode_all<K: Codec>(codec: &K, data: &[u8]) {
    let _ = codec.decode::<ArmyMove>(data);
    let _ = codec.decode::<GameLog>(data);
    let _ = codec.decode::<PlayingState>(data);
    let _ = codec.decode::<RecognitionOfWar>(data);
}

fuzz_target!(|data: &[u8]| {
    decode_all(&JsonCodec, data);
    decode_all(&CborCodec, data);
});
