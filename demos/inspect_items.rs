//! List the items, properties and grid layout of an AVIF file
use avif_container::{AvifParser, ConstructionMethod};
use std::env;
use std::fs::File;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <avif-file>", args[0]);
        std::process::exit(1);
    }

    let path = &args[1];
    let file = File::open(path).expect("Failed to open file");
    let mut parser = match AvifParser::from_reader(file) {
        Ok(parser) => parser,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    };

    println!("File: {}", path);
    println!("Major brand: {}", parser.major_brand());
    let brands: Vec<String> = parser.compatible_brands().iter().map(|b| b.to_string()).collect();
    println!("Compatible brands: {}", brands.join(", "));
    let primary = parser.primary_item_id();
    println!("Primary item: {}", primary);

    println!("\n=== Items ===");
    for item in parser.items() {
        let hidden = if item.hidden { " (hidden)" } else { "" };
        print!("  #{} {}{}", item.item_id, item.item_type, hidden);
        if let Some(content_type) = &item.content_type {
            print!(" content_type={}", content_type);
        }
        println!();

        if let Some(location) = parser.item_location(item.item_id) {
            let method = match location.construction_method {
                ConstructionMethod::File => "file",
                ConstructionMethod::Idat => "idat",
            };
            println!(
                "    {} bytes in {} extent(s), {}",
                location.total_item_size,
                location.extents.len(),
                method
            );
        }
        for (property, essential) in parser.item_properties(item.item_id) {
            let marker = if essential { "!" } else { " " };
            println!("    {}{} {:?}", marker, property.box_type(), property);
        }
    }

    println!("\n=== References ===");
    for reference in parser.item_references() {
        println!(
            "  {} {} -> {:?}",
            reference.reference_type,
            reference.from_item_id,
            &reference.to_item_ids[..]
        );
    }

    if let Some(alpha) = parser.alpha_item_id(primary) {
        let premultiplied = parser.premultiplied_alpha(primary, alpha);
        println!("\nAlpha item: {} (premultiplied: {})", alpha, premultiplied);
    }
    if let Some(exif) = parser.exif_item_id() {
        println!("Exif item: {}", exif);
    }
    if let Some(xmp) = parser.xmp_item_id() {
        println!("XMP item: {}", xmp);
    }
    let transforms = parser.transforms(primary);
    if !transforms.is_identity() {
        println!("Transforms: {:?}", transforms);
    }

    let is_grid = parser.item_info(primary).is_some_and(|info| info.item_type == b"grid");
    if is_grid {
        match parser.grid_info(primary) {
            Ok(grid) => {
                let d = grid.descriptor;
                println!("\n=== Grid ===");
                println!("{}x{} tiles, output {}x{}", d.columns, d.rows, d.output_width, d.output_height);
                println!("Tile items: {:?}", &grid.tile_item_ids[..]);
            }
            Err(e) => eprintln!("Grid error: {}", e),
        }
    }
}
