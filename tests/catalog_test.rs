#![allow(missing_docs)]

use rescache::catalog::{DescriptorBody, PictureIndex, StyleCatalog, TextIndex};
use rescache::format::{DescriptorKind, FLAG_REGULAR, TextBody};
use rescache::{
    CacheError, Parent, PictureWriter, PixelFormat, Rect, Result, StyleWriter, TextWriter,
};

const RECT: Rect = Rect {
    x: 0,
    y: 0,
    width: 64,
    height: 48,
};

// Header plus one scene record.
const FIRST_DESCRIPTOR: usize = 8 + 28;

fn two_pictures() -> Result<Vec<u8>> {
    let mut style = StyleWriter::new();
    let scene = Parent::Scene(style.scene(1, RECT, 0, 255));
    style.picture(scene, 1, 0, 0, false);
    style.picture(scene, 2, 4, 4, false);
    style.to_bytes()
}

fn kinds(catalog: &StyleCatalog, (count, offset): (u32, u32)) -> Result<Vec<DescriptorKind>> {
    catalog
        .children(offset, count)
        .map(|d| d.map(|d| d.header.kind))
        .collect()
}

#[test]
fn scenes_and_child_chains_are_parsed() -> Result<()> {
    let mut style = StyleWriter::new();
    let scene = Parent::Scene(style.scene(0xA1, RECT, 0xFF00_00FF, 200));
    style.picture(scene, 10, 1, 2, true);
    let group = Parent::Node(style.group(scene, 20, RECT));
    style.picture(group, 11, 3, 4, false);
    style.text(
        scene,
        30,
        TextBody {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            color: 0,
            background: 0,
            align: 0,
        },
    );
    style.scene(0xB2, RECT, 0, 255);

    let catalog = StyleCatalog::from_bytes(style.to_bytes()?)?;
    assert_eq!(catalog.scene_count(), 2);
    let record = catalog.find_scene(0xA1)?;
    assert_eq!((record.width, record.height), (64, 48));
    assert_eq!(record.opacity, 200);
    assert_eq!(record.child_count, 3);
    assert_eq!(
        kinds(&catalog, (record.child_count, record.child_offset))?,
        vec![DescriptorKind::Picture, DescriptorKind::Group, DescriptorKind::Text]
    );

    let children = catalog
        .children(record.child_offset, record.child_count)
        .collect::<Result<Vec<_>>>()?;
    assert_ne!(children[0].header.flags & FLAG_REGULAR, 0);
    let DescriptorBody::Container(body) = children[1].body else {
        panic!("expected a container, got {:?}", children[1].body);
    };
    let nested = catalog
        .children(body.child_offset, body.child_count)
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].header.id, 11);
    assert!(matches!(nested[0].body, DescriptorBody::Picture(p) if p.x == 3 && p.y == 4));

    let empty = catalog.find_scene(0xB2)?;
    assert_eq!((empty.child_count, empty.child_offset), (0, 0));
    assert!(matches!(catalog.find_scene(0xC3), Err(CacheError::NotFound(_))));
    Ok(())
}

#[test]
fn truncated_scene_tables_are_invalid() -> Result<()> {
    let mut bytes = two_pictures()?;
    bytes.truncate(8 + 10);
    assert!(matches!(
        StyleCatalog::from_bytes(bytes),
        Err(CacheError::InvalidFormat(_))
    ));
    assert!(matches!(
        StyleCatalog::from_bytes(vec![1, 0]),
        Err(CacheError::InvalidFormat(_))
    ));
    Ok(())
}

#[test]
fn a_descriptor_linking_to_itself_stops_the_walk() -> Result<()> {
    let mut bytes = two_pictures()?;
    let own = (FIRST_DESCRIPTOR as u32).to_le_bytes();
    bytes[FIRST_DESCRIPTOR + 8..FIRST_DESCRIPTOR + 12].copy_from_slice(&own);

    let catalog = StyleCatalog::from_bytes(bytes)?;
    let record = catalog.find_scene(1)?;
    let walked: Vec<_> = catalog
        .children(record.child_offset, record.child_count)
        .collect();
    assert_eq!(walked.len(), 1);
    assert!(matches!(walked[0], Err(CacheError::InvalidFormat(_))));
    Ok(())
}

#[test]
fn a_two_descriptor_cycle_stops_the_walk() -> Result<()> {
    let mut bytes = two_pictures()?;
    let mut next = [0u8; 4];
    next.copy_from_slice(&bytes[FIRST_DESCRIPTOR + 8..FIRST_DESCRIPTOR + 12]);
    let second = u32::from_le_bytes(next) as usize;
    let first = (FIRST_DESCRIPTOR as u32).to_le_bytes();
    bytes[second + 8..second + 12].copy_from_slice(&first);
    // The scene claims more children than the chain holds.
    bytes[8 + 20..8 + 24].copy_from_slice(&5u32.to_le_bytes());

    let catalog = StyleCatalog::from_bytes(bytes)?;
    let record = catalog.find_scene(1)?;
    assert_eq!(record.child_count, 5);
    let walked: Vec<_> = catalog
        .children(record.child_offset, record.child_count)
        .collect();
    assert_eq!(walked.len(), 2);
    assert!(matches!(&walked[0], Ok(d) if d.header.id == 1));
    assert!(matches!(walked[1], Err(CacheError::InvalidFormat(_))));
    Ok(())
}

#[test]
fn unknown_kinds_are_skipped_by_length() -> Result<()> {
    let mut bytes = two_pictures()?;
    bytes[FIRST_DESCRIPTOR] = 9;

    let catalog = StyleCatalog::from_bytes(bytes)?;
    let record = catalog.find_scene(1)?;
    let children = catalog
        .children(record.child_offset, record.child_count)
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].body, DescriptorBody::Unknown);
    assert_eq!(children[1].header.id, 2);
    Ok(())
}

#[test]
fn short_descriptor_bodies_are_invalid() -> Result<()> {
    let mut bytes = two_pictures()?;
    bytes[FIRST_DESCRIPTOR + 2..FIRST_DESCRIPTOR + 4].copy_from_slice(&2u16.to_le_bytes());

    let catalog = StyleCatalog::from_bytes(bytes)?;
    assert!(matches!(
        catalog.descriptor_at(FIRST_DESCRIPTOR as u32),
        Err(CacheError::InvalidFormat(_))
    ));
    assert!(matches!(
        catalog.descriptor_at(4),
        Err(CacheError::InvalidFormat(_))
    ));
    Ok(())
}

#[test]
fn partitions_are_searched_by_range_then_by_letter() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let primary = dir.path().join("ui.pic");

    let mut a = PictureWriter::new(1);
    for seed in 1..=3u8 {
        a.push("a", PixelFormat::Rgb565, 2, 2, vec![seed; 8]);
    }
    a.write_to(&primary)?;
    let mut b = PictureWriter::new(3);
    b.placeholder();
    b.push("b", PixelFormat::Argb8888, 1, 1, vec![4; 4]);
    b.write_to(&dir.path().join("ui_b.pic"))?;

    let index = PictureIndex::open(&primary, 4, false)?;
    assert_eq!(index.partition_count(), 2);

    // Id 3 falls in partition b's range, but b only holds a placeholder.
    let three = index.locate(3)?;
    assert_eq!(three.partition, 0);
    assert_eq!(index.read_payload(&three)?, vec![3; 8]);

    let four = index.locate(4)?;
    assert_eq!(four.partition, 1);
    assert_eq!(four.format, PixelFormat::Argb8888);
    assert_eq!(four.decoded_size(), 4);
    assert_eq!(index.read_payload(&four)?, vec![4; 4]);
    assert_eq!(index.payload_reads(), 2);
    assert!(matches!(index.locate(5), Err(CacheError::NotFound(_))));

    let single = PictureIndex::open(&primary, 1, false)?;
    assert_eq!(single.partition_count(), 1);
    assert!(matches!(single.locate(4), Err(CacheError::NotFound(_))));
    Ok(())
}

#[test]
fn truncated_payloads_are_short_reads() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("short.pic");
    let mut pictures = PictureWriter::new(1);
    pictures.push("icon", PixelFormat::Rgb565, 8, 8, vec![0xAB; 128]);
    pictures.write_to(&path)?;
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)?
        .set_len(100)?;

    // 24-byte header, one 20-byte entry, 4 bytes of metrics: 52 payload bytes left.
    for use_mmap in [false, true] {
        let index = PictureIndex::open(&path, 1, use_mmap)?;
        let location = index.locate(1)?;
        assert_eq!(location.compressed_size, 128);
        assert!(matches!(
            index.read_payload(&location),
            Err(CacheError::ShortRead {
                expected: 128,
                actual: 52
            })
        ));
    }
    Ok(())
}

#[test]
fn text_ids_start_at_the_header_offset() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ui.txt");
    let mut texts = TextWriter::new(10);
    assert_eq!(texts.push("alpha"), 10);
    assert_eq!(texts.push("βeta"), 11);
    texts.write_to(&path)?;

    let index = TextIndex::open(&path, false)?;
    assert_eq!(index.len(), 2);
    assert_eq!(index.read(&index.locate(11)?)?, "βeta".as_bytes());
    assert!(matches!(index.locate(9), Err(CacheError::NotFound(_))));
    assert!(matches!(index.locate(12), Err(CacheError::NotFound(_))));

    let mut bytes = std::fs::read(&path)?;
    bytes[8..10].copy_from_slice(&3u16.to_le_bytes());
    std::fs::write(&path, bytes)?;
    assert!(matches!(
        TextIndex::open(&path, false),
        Err(CacheError::InvalidFormat(_))
    ));
    Ok(())
}
