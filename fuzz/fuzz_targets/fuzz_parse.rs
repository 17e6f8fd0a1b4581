#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(mut parser) = avif_container::AvifParser::from_bytes(data) else {
        return;
    };
    let primary = parser.primary_item_id();
    let _ = parser.transforms(primary);
    let _ = parser.has_unsupported_essential_properties(primary);
    if let Some(alpha) = parser.alpha_item_id(primary) {
        let _ = parser.premultiplied_alpha(primary, alpha);
    }
    let ids: Vec<u32> = parser.items().iter().map(|item| item.item_id).collect();
    for id in ids {
        let _ = parser.read_item(id);
        let _ = parser.grid_info(id);
    }
});
