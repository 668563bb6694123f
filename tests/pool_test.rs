#![allow(missing_docs)]

mod common;

use common::*;
use rescache::pool::PoolKind;
use rescache::pool::compact::CompactPacker;
use rescache::{CacheConfig, CacheContext, CacheError, PreloadOptions, RegularScope, Result, Scope};

fn storage_of(cache: &CacheContext, id: u32) -> Result<Option<&'static str>> {
    Ok(cache
        .stats()?
        .blocks_in(PoolKind::Bitmap)
        .find(|b| b.id == id)
        .map(|b| b.storage))
}

fn screen_config() -> CacheConfig {
    common::config().with_screen(u32::from(SCREEN_W), u32::from(SCREEN_H))
}

#[test]
fn full_screen_bitmaps_use_the_slab_until_it_runs_out() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = write_screens(dir.path(), "screens")?;
    let cache = CacheContext::new(screen_config())?;
    let set = paths.open(&cache)?;
    let scene = cache.load_scene(set, SCREEN_SCENE)?;

    let screens = cache.load_pictures(Scope::Scene(&scene), &[1, 2, 3])?;
    assert_eq!(storage_of(&cache, 1)?, Some("slab"));
    assert_eq!(storage_of(&cache, 2)?, Some("slab"));
    assert_eq!(storage_of(&cache, 3)?, Some("heap"));

    let size = usize::from(SCREEN_W) * usize::from(SCREEN_H) * 2;
    let stats = cache.stats()?;
    assert_eq!(stats.slab.in_use, 2);
    assert_eq!(stats.slab.slot_size, size);
    assert_eq!(stats.pools[0].used, size, "only the heap fallback is charged");
    for (picture, seed) in screens.iter().zip(1u8..) {
        cache.with_picture_data(picture, |px| assert_eq!(px, pattern(size, seed).as_slice()))?;
    }

    let mut screens = screens.into_iter();
    if let Some(first) = screens.next() {
        assert!(cache.unload_picture(first)?);
    }
    assert_eq!(cache.stats()?.slab.in_use, 1);
    for picture in screens {
        cache.unload_picture(picture)?;
    }
    let stats = cache.stats()?;
    assert_eq!(stats.slab.in_use, 0);
    assert_eq!(stats.pools[0].used, 0);
    cache.unload_scene(scene)?;
    Ok(())
}

#[test]
fn compact_preload_packs_one_arena_and_frees_it_with_the_scene() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    let ids = [ICON, INDEX8, INDEX4, BIG];
    let scheduled = cache.preload(
        Scope::Scene(&scene),
        Some(&ids),
        PreloadOptions::serial().compact(),
    )?;
    assert_eq!(scheduled, 4);

    // 32-byte headers on 128, 1040, 76 and 8192 aligned payloads.
    let charges = 160 + 1072 + 108 + 8224;
    let stats = cache.stats()?;
    assert_eq!(stats.arenas.len(), 1);
    let arena = &stats.arenas[0];
    assert_eq!(arena.scene, MAIN_SCENE);
    assert_eq!(arena.capacity, charges + 64);
    assert_eq!(arena.offset, charges);
    assert_eq!(arena.offset + arena.free_size, arena.capacity);
    assert_eq!(arena.blocks, 4);
    assert_eq!(stats.pools[0].used, arena.capacity);
    for id in ids {
        assert_eq!(storage_of(&cache, id)?, Some("arena"));
    }

    let icon = cache.load_picture(Scope::Scene(&scene), ICON)?;
    cache.with_picture_data(&icon, |px| assert_eq!(px, decoded(ICON).as_slice()))?;
    cache.unload_picture(icon)?;

    cache.unload_scene(scene)?;
    let stats = cache.stats()?;
    assert!(stats.arenas.is_empty());
    assert_eq!(stats.pools[0].used, 0);
    assert_eq!(stats.pools[0].blocks, 0);
    Ok(())
}

#[test]
fn oversized_compact_requests_fall_back_to_heap_blocks() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = CacheContext::new(CacheConfig {
        max_compact_block_size: 2048,
        ..common::config()
    })?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    cache.preload(
        Scope::Scene(&scene),
        Some(&[ICON, BIG]),
        PreloadOptions::serial().compact(),
    )?;
    assert_eq!(storage_of(&cache, ICON)?, Some("arena"));
    assert_eq!(storage_of(&cache, BIG)?, Some("heap"));
    let stats = cache.stats()?;
    assert_eq!(stats.arenas.len(), 1);
    assert_eq!(stats.arenas[0].capacity, 160 + 64);

    cache.unload_scene(scene)?;
    assert_eq!(cache.stats()?.pools[0].used, 0);
    Ok(())
}

#[test]
fn failed_compact_reservations_give_back_their_arenas() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = CacheContext::new(CacheConfig {
        bitmap_pool_capacity: 4000,
        max_compact_block_size: 8224 + 64,
        ..common::config()
    })?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;

    cache.preload(Scope::Scene(&scene), Some(&[ICON]), PreloadOptions::serial().compact())?;
    assert_eq!(cache.stats()?.pools[0].used, 160 + 64);

    // Planned as a 1136-byte arena for INDEX8 and an 8288-byte one for BIG.
    // The first fits the budget, the second does not.
    assert!(matches!(
        cache.preload(
            Scope::Scene(&scene),
            Some(&[INDEX8, BIG]),
            PreloadOptions::serial().compact(),
        ),
        Err(CacheError::OutOfSpace { .. })
    ));
    let stats = cache.stats()?;
    assert_eq!(stats.pools[0].used, 160 + 64);
    assert_eq!(stats.arenas.len(), 1);
    assert_eq!(stats.arenas[0].blocks, 1);
    assert_eq!(storage_of(&cache, INDEX8)?, None);

    cache.unload_scene(scene)?;
    assert_eq!(cache.stats()?.pools[0].used, 0);
    Ok(())
}

#[test]
fn compact_full_screen_bitmaps_only_carve_their_header() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let paths = write_screens(dir.path(), "screens")?;
    let cache = CacheContext::new(screen_config())?;
    let set = paths.open(&cache)?;
    let scene = cache.load_scene(set, SCREEN_SCENE)?;

    cache.preload(Scope::Scene(&scene), None, PreloadOptions::serial().compact())?;
    assert_eq!(storage_of(&cache, 1)?, Some("slab"));
    assert_eq!(storage_of(&cache, 2)?, Some("slab"));
    assert_eq!(storage_of(&cache, 3)?, Some("heap"));
    assert_eq!(storage_of(&cache, 4)?, Some("arena"));

    let stats = cache.stats()?;
    assert_eq!(stats.arenas.len(), 1);
    let arena = &stats.arenas[0];
    assert_eq!(arena.capacity, 3 * 32 + 160 + 64);
    assert_eq!(arena.offset, 2 * 32 + 160);
    assert_eq!(arena.offset + arena.free_size, arena.capacity);
    assert!(cache.is_scene_resident(&scene)?);

    cache.unload_scene(scene)?;
    let stats = cache.stats()?;
    assert!(stats.arenas.is_empty());
    assert_eq!(stats.slab.in_use, 0);
    Ok(())
}

#[test]
fn pinned_blocks_keep_their_arena_after_the_scene_goes() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = common::cache()?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;
    let key = scene.key();

    cache.preload(
        Scope::Scene(&scene),
        Some(&[ICON, LOGO]),
        PreloadOptions::serial().compact(),
    )?;
    cache.unload_scene(scene)?;

    let stats = cache.stats()?;
    assert_eq!(stats.arenas.len(), 1);
    assert!(stats.arenas[0].scene_released);
    assert_eq!(stats.arenas[0].blocks, 1);
    assert_eq!(cache.bitmap_refs(set.source(), LOGO)?, Some(0));
    assert_eq!(cache.bitmap_refs(set.source(), ICON)?, None);

    assert_eq!(cache.clear_regular(RegularScope::scene(key))?, 1);
    let stats = cache.stats()?;
    assert!(stats.arenas.is_empty());
    assert_eq!(stats.pools[0].used, 0);
    Ok(())
}

#[test]
fn reservation_plan_splits_at_the_arena_limit() {
    let config = CacheConfig {
        max_compact_block_size: 1000,
        ..CacheConfig::default()
    };
    let packer = CompactPacker::new(&config);
    assert_eq!(packer.charge_for(128, false), 160);
    assert_eq!(packer.charge_for(128, true), 32);
    assert_eq!(packer.arena_size_for(900), Some(964));
    assert_eq!(packer.arena_size_for(937), None);

    // Limit is 1000 - 64; the 2000-byte charge cannot be packed at all.
    let plan = packer.plan_reservation(&[400, 400, 400, 2000, 100]);
    assert_eq!(plan, vec![864, 564]);
    assert!(packer.plan_reservation(&[]).is_empty());
}

#[test]
fn alignment_rounds_every_block() -> Result<()> {
    let fx = Fixture::new()?;
    let cache = CacheContext::new(CacheConfig {
        alignment: 16,
        ..common::config()
    })?;
    let set = fx.open(&cache)?;
    let scene = cache.load_scene(set, MAIN_SCENE)?;
    let hello = cache.load_text(Scope::Scene(&scene), 1)?;
    let idx4 = cache.load_picture(Scope::Scene(&scene), INDEX4)?;

    let stats = cache.stats()?;
    for block in &stats.blocks {
        assert_eq!(block.size % 16, 0, "{block:?}");
    }
    assert_eq!(stats.pools[0].used, 80);
    assert_eq!(stats.pools[1].used, 16);
    assert_eq!(stats.pools[2].used, 32);

    cache.unload_picture(idx4)?;
    cache.unload_text(hello)?;
    cache.unload_scene(scene)?;
    assert_eq!(cache.stats()?.footprint, 0);
    Ok(())
}
