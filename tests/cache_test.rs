#![allow(missing_docs)]

mod common;

use common::*;
use rescache::format::RegionBody;
use rescache::pool::PoolKind;
use rescache::{
    CacheConfig, CacheContext, CacheError, GroupLevel, Parent, PixelFormat, Rect, Result, Scope,
    StyleWriter,
};

#[test]
fn repeated_picture_load_shares_one_decode() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    assert_eq!(cache.payload_reads(set)?, 0);
    let first = cache.load_picture(Scope::Scene(&scene), BIG)?;
    assert_eq!(cache.payload_reads(set)?, 1);
    let second = cache.load_picture(Scope::Scene(&scene), BIG)?;
    assert_eq!(cache.payload_reads(set)?, 1, "a hit must not touch the disk");
    assert_eq!(cache.decodes()?, 1);

    assert_eq!(first.block(), second.block());
    assert_eq!((first.width(), first.height()), (64, 64));
    assert_eq!(first.bytes_per_pixel(), 2);
    assert_eq!(first.format(), PixelFormat::Rgb565);
    assert_eq!(cache.picture_refs(&first)?, 2);
    cache.with_picture_data(&first, |px| assert_eq!(px, decoded(BIG).as_slice()))?;

    assert!(!cache.unload_picture(second)?);
    assert_eq!(cache.picture_refs(&first)?, 1);
    assert!(cache.unload_picture(first)?);
    assert_eq!(cache.bitmap_refs(set.source(), BIG)?, None);

    let again = cache.load_picture(Scope::Scene(&scene), BIG)?;
    assert_eq!(cache.decodes()?, 2);
    assert_eq!(cache.payload_reads(set)?, 2);
    cache.unload_picture(again)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn cached_pictures_survive_a_truncated_catalog() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;
    let first = cache.load_picture(Scope::Scene(&scene), BIG)?;

    std::fs::OpenOptions::new()
        .write(true)
        .open(&fx.paths.picture)?
        .set_len(0)?;

    let second = cache.load_picture(Scope::Scene(&scene), BIG)?;
    assert_eq!(first.block(), second.block());
    assert_eq!((second.width(), second.height()), (64, 64));
    assert_eq!(cache.payload_reads(set)?, 1);
    assert!(matches!(
        cache.load_picture(Scope::Scene(&scene), ICON),
        Err(CacheError::ShortRead { .. })
    ));

    cache.unload_picture(second)?;
    cache.unload_picture(first)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn every_stored_format_decodes_to_its_payload() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let pictures = cache.load_pictures(Scope::Scene(&scene), &[ICON, INDEX8, INDEX4])?;
    for picture in &pictures {
        cache.with_picture_data(picture, |px| {
            assert_eq!(px, decoded(picture.id()).as_slice(), "picture {}", picture.id());
        })?;
    }
    assert_eq!(pictures[1].format(), PixelFormat::Index8);
    assert_eq!((pictures[2].width(), pictures[2].height()), (5, 3));
    assert_eq!((pictures[0].x(), pictures[0].y()), (1, 2));
    for picture in pictures {
        cache.unload_picture(picture)?;
    }
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn mapped_raw_bitmaps_skip_reads_and_decoders() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = CacheContext::new(CacheConfig::default())?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let icon = cache.load_picture(Scope::Scene(&scene), ICON)?;
    assert_eq!(cache.payload_reads(set)?, 0);
    assert_eq!(cache.decodes()?, 0);
    cache.with_picture_data(&icon, |px| assert_eq!(px, decoded(ICON).as_slice()))?;
    let stats = cache.stats()?;
    let block = stats
        .blocks_in(PoolKind::Bitmap)
        .find(|b| b.id == ICON)
        .map(|b| b.storage);
    assert_eq!(block, Some("mapped"));

    let indexed = cache.load_picture(Scope::Scene(&scene), INDEX8)?;
    assert_eq!(cache.decodes()?, 1);
    assert_eq!(cache.payload_reads(set)?, 1);

    cache.unload_picture(icon)?;
    cache.unload_picture(indexed)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn scenes_are_shared_and_counted() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;

    let a = cache.load_scene(set, MAIN_SCENE)?;
    let b = cache.load_scene(set, MAIN_SCENE)?;
    assert_eq!(a.key(), b.key());
    assert_eq!(a.rect.width, 320);
    assert_eq!(a.background, 0xFF20_2020);
    assert_eq!(a.child_count(), 9);

    let key = a.key();
    let stats = cache.stats()?;
    assert_eq!(stats.scenes.len(), 1);
    assert_eq!(stats.scenes[0].refs, 2);

    cache.unload_scene(a)?;
    assert!(cache.is_scene_loaded(key)?);
    cache.unload_scene(b)?;
    assert!(!cache.is_scene_loaded(key)?);

    assert!(matches!(
        cache.load_scene(set, 0xDEAD),
        Err(CacheError::NotFound(_))
    ));
    Ok(())
}

#[test]
fn groups_and_subgroups_scope_lookups() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    assert!(matches!(
        cache.load_picture(Scope::Scene(&scene), GROUP_PIC),
        Err(CacheError::NotFound(_))
    ));

    let group = cache.load_group(Scope::Scene(&scene), GROUP)?;
    assert_eq!(group.level, GroupLevel::Group);
    assert_eq!(group.child_count(), 3);
    let picture = cache.load_picture(Scope::Group(&group), GROUP_PIC)?;
    assert_eq!((picture.x(), picture.y()), (9, 9));
    cache.with_picture_data(&picture, |px| assert_eq!(px, decoded(GROUP_PIC).as_slice()))?;

    let subgroup = cache.load_subgroup(&group, SUBGROUP)?;
    assert_eq!(subgroup.level, GroupLevel::Subgroup);
    let deep = cache.load_picture(Scope::Group(&subgroup), SUBGROUP_PIC)?;
    assert_eq!(deep.bytes_per_pixel(), 4);

    assert!(matches!(
        cache.load_group(Scope::Group(&subgroup), 0x12),
        Err(CacheError::NotFound(_))
    ));
    assert!(matches!(
        cache.load_group(Scope::Scene(&scene), SUBGROUP),
        Err(CacheError::NotFound(_))
    ));

    cache.unload_picture(deep)?;
    cache.unload_picture(picture)?;
    cache.unload_group(subgroup);
    cache.unload_group(group);
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn picture_regions_resolve_their_frames() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let region = cache.load_picregion(Scope::Scene(&scene), FRAME0)?;
    assert_eq!(region.frame_count, FRAMES);
    assert_eq!(region.frame_id(2), Some(FRAME0 + 2));
    assert_eq!(region.frame_id(FRAMES), None);
    assert_eq!(region.rect.x, 40);

    let frame = cache.load_picture(Scope::Scene(&scene), FRAME0 + 1)?;
    assert_eq!(frame.x(), 40);
    cache.with_picture_data(&frame, |px| assert_eq!(px, decoded(FRAME0 + 1).as_slice()))?;

    assert!(matches!(
        cache.load_picregion(Scope::Scene(&scene), ICON),
        Err(CacheError::NotFound(_))
    ));

    cache.unload_picture(frame)?;
    cache.unload_picregion(region);
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn regions_running_past_the_id_space_are_invalid() -> Result<()> {
    let fx = Fixture::new()?;
    let style_path = fx.dir.path().join("wrap.sty");
    let mut style = StyleWriter::new();
    let rect = Rect {
        x: 0,
        y: 0,
        width: 32,
        height: 32,
    };
    let scene = Parent::Scene(style.scene(MAIN_SCENE, rect, 0, 255));
    style.region(
        scene,
        u32::MAX - 1,
        RegionBody {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
            frame_count: 3,
        },
    );
    style.write_to(&style_path)?;

    let cache = common::cache()?;
    let set = cache.open(&style_path, &fx.paths.picture, &fx.paths.text)?;
    assert!(matches!(
        cache.load_scene(set, MAIN_SCENE),
        Err(CacheError::InvalidFormat(_))
    ));
    assert!(cache.stats()?.scenes.is_empty());
    Ok(())
}

#[test]
fn texts_are_nul_terminated_and_shared() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let hello = cache.load_text(Scope::Scene(&scene), 1)?;
    assert_eq!(cache.text_string(&hello)?, "Hello");
    assert_eq!(hello.rect.width, 100);
    assert_eq!(hello.align, 1);

    let world = cache.load_text(Scope::Scene(&scene), 2)?;
    assert_eq!(world.rect.x, 50);
    let again = cache.load_text_by_id(set, 1)?;
    assert_eq!(again.block(), hello.block());

    let stats = cache.stats()?;
    let sizes: Vec<usize> = stats.blocks_in(PoolKind::Text).map(|b| b.size).collect();
    assert_eq!(sizes, vec![8, 8], "6 and 6 bytes aligned to 4");

    let group = cache.load_group(Scope::Scene(&scene), GROUP)?;
    let umlaut = cache.load_text(Scope::Group(&group), 3)?;
    assert_eq!(cache.text_string(&umlaut)?, "Grüße");

    assert!(!cache.unload_text(again)?);
    assert!(cache.unload_text(hello)?);
    assert!(cache.unload_text(world)?);
    assert!(cache.unload_text(umlaut)?);
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn failed_batches_release_what_they_loaded() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let err = cache.load_pictures(Scope::Scene(&scene), &[ICON, INDEX8, 99]);
    assert!(matches!(err, Err(CacheError::NotFound(_))));
    assert_eq!(cache.bitmap_refs(set.source(), ICON)?, None);
    assert_eq!(cache.bitmap_refs(set.source(), INDEX8)?, None);

    let err = cache.load_texts(Scope::Scene(&scene), &[1, 2, 7]);
    assert!(matches!(err, Err(CacheError::NotFound(_))));
    assert_eq!(cache.stats()?.blocks_in(PoolKind::Text).count(), 0);

    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn exhausted_bitmap_budget_reports_out_of_space() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = CacheContext::new(CacheConfig {
        bitmap_pool_capacity: 4096,
        ..common::config()
    })?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    match cache.load_picture(Scope::Scene(&scene), BIG) {
        Err(CacheError::OutOfSpace {
            pool,
            requested,
            available,
        }) => {
            assert_eq!(pool, "bitmap");
            assert_eq!(requested, 64 * 64 * 2);
            assert_eq!(available, 4096);
        }
        other => panic!("expected OutOfSpace, got {other:?}"),
    }
    assert_eq!(cache.bitmap_refs(set.source(), BIG)?, None);

    let icon = cache.load_picture(Scope::Scene(&scene), ICON)?;
    assert_eq!(cache.stats()?.pools[0].used, 128);
    cache.unload_picture(icon)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn residency_tracks_every_picture_of_a_scene() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, SIDE_SCENE)?;

    assert!(!cache.is_scene_resident(&scene)?);
    let icon = cache.load_picture(Scope::Scene(&scene), ICON)?;
    assert!(!cache.is_scene_resident(&scene)?);
    let big = cache.load_picture(Scope::Scene(&scene), BIG)?;
    assert!(cache.is_scene_resident(&scene)?);

    cache.unload_picture(icon)?;
    assert!(!cache.is_scene_resident(&scene)?);
    cache.unload_picture(big)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn force_clear_frees_unpinned_blocks_and_stales_handles() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let icon = cache.load_picture(Scope::Scene(&scene), ICON)?;
    let hello = cache.load_text(Scope::Scene(&scene), 1)?;
    assert_eq!(cache.force_clear()?, 2);

    assert!(matches!(
        cache.with_picture_data(&icon, |px| px.len()),
        Err(CacheError::Internal(_))
    ));
    assert!(matches!(cache.text_string(&hello), Err(CacheError::Internal(_))));
    assert!(!cache.unload_picture(icon)?, "stale release is a no-op");
    assert!(!cache.unload_text(hello)?);

    let key = scene.key();
    assert!(cache.is_scene_loaded(key)?);
    let reloaded = cache.load_picture(Scope::Scene(&scene), ICON)?;
    assert_eq!(cache.picture_refs(&reloaded)?, 1);
    cache.unload_picture(reloaded)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn stats_render_as_json_and_tree() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;
    let icon = cache.load_picture(Scope::Scene(&scene), ICON)?;

    let stats = cache.stats()?;
    assert_eq!(stats.decodes, 1);
    assert_eq!(stats.open_sets.len(), 1);
    assert!(stats.peak_memory >= stats.footprint);

    let json: serde_json::Value = serde_json::from_str(&stats.to_json()?)
        .map_err(|e| CacheError::Internal(e.to_string()))?;
    assert_eq!(json["pools"][0]["kind"], "Bitmap");
    assert_eq!(json["pools"][0]["used"], 128);
    assert_eq!(json["scenes"][0]["id"], MAIN_SCENE);
    assert_eq!(json["worker"], "Idle");

    let tree = stats.to_string();
    assert!(tree.starts_with("=== RESCACHE STATS ==="));
    assert!(tree.contains("[POOLS]"));
    assert!(tree.contains("bitmap"));
    cache.dump_stats()?;

    cache.unload_picture(icon)?;
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn custom_decoders_replace_builtins() -> Result<()> {
    use rescache::decode::Decoder;
    use rescache::DecoderRegistry;

    #[derive(Debug)]
    struct Inverting;

    impl Decoder for Inverting {
        fn format(&self) -> PixelFormat {
            PixelFormat::Rgb565
        }

        fn decode(&self, src: &[u8], dst: &mut [u8], _w: u16, _h: u16) -> Result<usize> {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = !*s;
            }
            Ok(src.len().min(dst.len()))
        }
    }

    let fx = Fixture::new()?;
    let mut decoders = DecoderRegistry::new();
    decoders.register(Box::new(Inverting));
    let cache = CacheContext::with_decoders(common::config(), decoders)?;
    let set = fx.open(&cache)?;
    let icon = cache.load_picture_by_id(set, ICON)?;
    let expected: Vec<u8> = decoded(ICON).iter().map(|b| !b).collect();
    cache.with_picture_data(&icon, |px| assert_eq!(px, expected.as_slice()))?;
    cache.unload_picture(icon)?;
    Ok(())
}
