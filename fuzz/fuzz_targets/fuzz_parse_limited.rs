#![no_main]
use avif_container::{AvifParser, DecodeConfig, Unstoppable};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let config = DecodeConfig::default()
        .with_peak_memory_limit(1 << 20)
        .with_total_megapixels_limit(16)
        .with_max_grid_tiles(64);
    let Ok(mut parser) = AvifParser::from_reader_with_config(Cursor::new(data), &config, &Unstoppable) else {
        return;
    };
    let primary = parser.primary_item_id();
    let _ = parser.read_item(primary);
    let _ = parser.grid_info(primary);
    if let Some(exif) = parser.exif_item_id() {
        let _ = parser.read_item(exif);
    }
});
