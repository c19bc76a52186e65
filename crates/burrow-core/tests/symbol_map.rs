//! Integration tests for symbol-map persistence across sessions.

mod common;

use std::fs;

use burrow_core::error::BurrowError;
use burrow_core::types::{Address, ImageInfo};
use burrow_core::{ItemSize, SymbolKind};
use common::{client_with, scratch_path, MockState};

fn image(name: &str, load_address: u64, slide: i64) -> ImageInfo
{
    ImageInfo::new(format!("/usr/lib/{name}"), Address::new(load_address), slide, 0x10_0000)
}

fn first_run() -> MockState
{
    let mut state = MockState::default();
    state.images = vec![image("libfoo.dylib", 0x1_0000_0000, 0x1000), image("libbar.dylib", 0x2_0000_0000, 0x2000)];
    state.define_symbol("foo_init", 0x1_0000_5000);
    state
}

#[test]
fn test_symbols_are_rebased_onto_new_load_bias()
{
    let path = scratch_path("rebase.json");

    let (mut first, _) = client_with(first_run());
    first.resolve("foo_init").unwrap();
    let bar = first.symbol(0x2_0000_0040u64).with_item_size(ItemSize::Four);
    first.symbols_mut().insert("bar_data", bar, SymbolKind::Data, Some("libbar.dylib"));
    let stray = first.symbol(0x10u64);
    first.symbols_mut().insert("stray", stray, SymbolKind::Unknown, None);
    assert_eq!(first.save_symbol_map(Some(&path)).unwrap(), 3);

    let mut second_run = MockState::default();
    second_run.images = vec![image("libfoo.dylib", 0x1_0000_4000, 0x5000)];
    second_run.map(0x1_0000_9000, vec![0x2a; 8], false);
    let (mut second, state) = client_with(second_run);

    let summary = second.load_symbol_map(Some(&path)).unwrap();
    assert_eq!(summary.loaded, 1);
    assert_eq!(summary.dropped, vec!["bar_data".to_string(), "stray".to_string()]);

    let foo = second.symbols().get("foo_init").unwrap();
    assert_eq!(foo, 0x1_0000_9000u64);
    assert_eq!(second.symbols().module_of("foo_init"), Some("libfoo.dylib"));
    assert_eq!(foo.peek(&second, 1).unwrap(), vec![0x2a]);
    assert_eq!(second.resolve("foo_init").unwrap(), foo);
    assert!(state.borrow().lookups.is_empty());

    fs::remove_file(&path).ok();
}

#[test]
fn test_item_size_and_kind_survive_reload()
{
    let path = scratch_path("item-size.json");

    let (mut first, _) = client_with(first_run());
    let bar = first.symbol(0x2_0000_0040u64).with_item_size(ItemSize::Two);
    first.symbols_mut().insert("bar_data", bar, SymbolKind::Data, Some("libbar.dylib"));
    first.save_symbol_map(Some(&path)).unwrap();

    let (mut second, _) = client_with(first_run());
    let summary = second.load_symbol_map(Some(&path)).unwrap();
    assert_eq!(summary.loaded, 1);
    assert!(summary.dropped.is_empty());

    let entry = *second.symbols().entry("bar_data").unwrap();
    assert_eq!(entry.symbol, 0x2_0000_0040u64);
    assert_eq!(entry.symbol.item_size(), ItemSize::Two);
    assert_eq!(entry.kind, SymbolKind::Data);

    fs::remove_file(&path).ok();
}

#[test]
fn test_default_path_comes_from_config()
{
    let path = scratch_path("default.json");

    let (mut client, _) = client_with(first_run());
    client.config_mut().symbol_map_path = path.clone();
    client.resolve("foo_init").unwrap();
    client.save_symbol_map(None).unwrap();

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["version"], 1);
    assert_eq!(saved["images"]["libfoo.dylib"], 0x1000);
    assert_eq!(saved["symbols"]["foo_init"]["module"], "libfoo.dylib");

    fs::remove_file(&path).ok();
}

#[test]
fn test_unreadable_maps_are_rejected()
{
    let (mut client, _) = client_with(first_run());

    let missing = scratch_path("missing.json");
    assert!(matches!(client.load_symbol_map(Some(&missing)), Err(BurrowError::Io(_))));

    let garbage = scratch_path("garbage.json");
    fs::write(&garbage, "not json").unwrap();
    assert!(matches!(client.load_symbol_map(Some(&garbage)), Err(BurrowError::Serialization(_))));

    fs::write(&garbage, r#"{"version": 99, "images": {}, "symbols": {}}"#).unwrap();
    assert!(matches!(client.load_symbol_map(Some(&garbage)), Err(BurrowError::Serialization(_))));
    assert!(client.symbols().is_empty());

    fs::remove_file(&garbage).ok();
}

#[test]
fn test_rebind_skips_unreadable_images()
{
    let (mut client, _) = client_with(first_run());
    assert_eq!(client.rebind_symbols(Some("libfoo")).unwrap(), 0);
    assert!(client.symbols().is_empty());
}

#[test]
fn test_rebind_reads_image_symbol_tables()
{
    let executable = std::env::current_exe().unwrap();
    let mut state = MockState::default();
    state.images = vec![ImageInfo::new(&executable, Address::new(0), 0, u64::MAX)];
    let (mut client, _) = client_with(state);

    let count = client.rebind_symbols(None).unwrap();
    assert!(count > 0);

    let module = executable.file_name().unwrap().to_string_lossy().into_owned();
    let plain = client.symbols().without_module_names();
    let (name, entry) = plain.iter().next().unwrap();
    let qualified = format!("{name}{{{module}}}");
    assert_eq!(client.symbols().get(&qualified).unwrap(), entry.symbol);
    assert_eq!(client.symbols().module_of(name), Some(module.as_str()));
}

#[test]
fn test_partial_module_hint_survives_reload()
{
    let path = scratch_path("partial-hint.json");

    let mut first_state = MockState::default();
    first_state.images = vec![image("system/libsystem_c.dylib", 0x1_8000_0000, 0x1000)];
    first_state.define_symbol("open", 0x1_8000_2000);
    let (mut first, _) = client_with(first_state);
    first.resolve("open{libsystem_c}").unwrap();
    assert_eq!(first.save_symbol_map(Some(&path)).unwrap(), 1);

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["symbols"]["open{libsystem_c}"]["module"], "libsystem_c.dylib");

    let mut second_state = MockState::default();
    second_state.images = vec![image("system/libsystem_c.dylib", 0x1_8000_2000, 0x3000)];
    let (mut second, _) = client_with(second_state);
    let summary = second.load_symbol_map(Some(&path)).unwrap();
    assert_eq!(summary.loaded, 1);
    assert!(summary.dropped.is_empty());
    assert_eq!(second.symbols().get("open{libsystem_c}").unwrap(), 0x1_8000_4000u64);

    fs::remove_file(&path).ok();
}
