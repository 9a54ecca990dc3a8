//! Basic usage example for the mesh aggregation wire format.

use mesh_wire::{Frame, FrameBuilder, Segment, SegmentWriter, Urgency, DEFAULT_MAX_PAYLOAD};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Mesh Aggregation Wire Example ===\n");

    // 1. Build a frame carrying two accumulators' segments
    println!("1. Building a periodic frame...");
    let mut builder = FrameBuilder::new(Urgency::Periodic, DEFAULT_MAX_PAYLOAD);

    builder.append_segment(|buf| {
        let Some(mut writer) = SegmentWriter::new(buf, 1) else {
            return 0;
        };
        writer.push(b"temp", &[21]);
        writer.push(b"hum", &[40]);
        writer.finish()
    });

    builder.append_segment(|buf| {
        let Some(mut writer) = SegmentWriter::new(buf, 2) else {
            return 0;
        };
        writer.push(&[7], &[1, 0, 0, 0]);
        writer.finish()
    });

    println!("   Segments: {}", builder.segment_count());
    let payload = builder.finish();
    println!("   Encoded frame size: {} bytes", payload.len());

    // 2. Demultiplex it again
    println!("\n2. Demultiplexing by owner id...");
    let frame = Frame::parse(&payload)?;
    println!("   Urgent: {}", frame.is_urgent());

    for owner_id in [1u8, 2, 3] {
        let rest = frame.segment_for(owner_id);
        if rest.is_empty() {
            println!("   owner {}: no segment", owner_id);
            continue;
        }

        let segment = Segment::parse(rest)?;
        for record in segment.records() {
            let record = record?;
            println!(
                "   owner {}: key={:?} value={:?}",
                owner_id, record.key, record.value
            );
        }
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
