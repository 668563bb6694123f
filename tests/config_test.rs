#![allow(missing_docs)]

use rescache::{CacheConfig, CacheContext, CacheError, Result};

#[test]
fn defaults_suit_a_small_display() {
    let config = CacheConfig::default();
    assert_eq!(config.max_open_sets, 6);
    assert_eq!(config.alignment, 4);
    assert_eq!(config.block_overhead, 32);
    assert_eq!(config.compact_margin, 64);
    assert_eq!(config.screen_bitmap_size(), 0, "slab disabled without a screen");
    assert!(config.use_mmap);
    assert!(config.validate().is_ok());
}

#[test]
fn missing_json_fields_take_defaults() -> Result<()> {
    assert_eq!(CacheConfig::from_json("{}")?, CacheConfig::default());

    let config = CacheConfig::from_json(
        r#"{ "alignment": 8, "screen_width": 320, "screen_height": 240, "use_mmap": false }"#,
    )?;
    assert_eq!(config.alignment, 8);
    assert_eq!(config.screen_bitmap_size(), 320 * 240 * 2);
    assert_eq!(config.align(5), 8);
    assert_eq!(config.align(16), 16);
    assert!(!config.use_mmap);
    assert_eq!(config.max_open_sets, 6);
    Ok(())
}

#[test]
fn invalid_values_are_rejected() {
    for json in [
        r#"{ "alignment": 3 }"#,
        r#"{ "max_open_sets": 0 }"#,
        r#"{ "max_partitions": 27 }"#,
        r#"{ "max_compact_block_size": 96 }"#,
        r#"{ "alignment": "four" }"#,
        "{",
    ] {
        assert!(
            matches!(CacheConfig::from_json(json), Err(CacheError::InvalidFormat(_))),
            "{json}"
        );
    }
}

#[test]
fn a_cache_refuses_an_invalid_config() {
    let config = CacheConfig {
        alignment: 0,
        ..CacheConfig::default()
    };
    assert!(matches!(
        CacheContext::new(config),
        Err(CacheError::InvalidFormat(_))
    ));
}

#[test]
fn screen_geometry_sets_the_slab_size() -> Result<()> {
    let cache = CacheContext::new(CacheConfig::default().with_screen(480, 272))?;
    assert_eq!(cache.config().screen_bitmap_size(), 480 * 272 * 2);
    assert_eq!(cache.stats()?.slab.slot_size, 480 * 272 * 2);
    Ok(())
}
