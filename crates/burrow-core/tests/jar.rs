//! Integration tests for symbol jars and name resolution.

mod common;

use burrow_core::error::BurrowError;
use burrow_core::{BreakpointKind, Client, MonitorSpec, SymbolJar, SymbolKind, ValueFormat};
use common::{client, client_with, hit, MockState};

fn sample_jar(client: &Client) -> SymbolJar
{
    let mut jar = SymbolJar::new();
    let libc = Some("libsystem_c.dylib");
    jar.insert("open", client.symbol(0x1000u64), SymbolKind::Code, libc);
    jar.insert("open{libsystem_c.dylib}", client.symbol(0x1000u64), SymbolKind::Code, libc);
    jar.insert("openat", client.symbol(0x1010u64), SymbolKind::Code, libc);
    jar.insert("OpenSSL_version", client.symbol(0x2000u64), SymbolKind::Code, Some("libcrypto.dylib"));
    jar.insert("environ", client.symbol(0x3000u64), SymbolKind::Data, libc);
    jar.insert("scratch", client.symbol(0x4000u64), SymbolKind::Unknown, None);
    jar
}

fn names(jar: &SymbolJar) -> Vec<&str>
{
    jar.names().collect()
}

#[test]
fn test_prefix_filter_respects_case()
{
    let (client, _) = client();
    let jar = sample_jar(&client);

    assert_eq!(names(&jar.filter_starts_with("open", true)), vec!["open", "openat", "open{libsystem_c.dylib}"]);
    assert_eq!(
        names(&jar.filter_starts_with("open", false)),
        vec!["OpenSSL_version", "open", "openat", "open{libsystem_c.dylib}"]
    );
    assert_eq!(names(&jar.filter_ends_with("AT", false)), vec!["openat"]);
}

#[test]
fn test_filters_compose_without_touching_source()
{
    let (client, _) = client();
    let jar = sample_jar(&client);

    let narrowed = jar
        .filter_name_contains("open", false)
        .exclude_name_contains("ssl", false)
        .without_module_names();
    assert_eq!(names(&narrowed), vec!["open", "openat"]);
    assert_eq!(jar.len(), 6);
}

#[test]
fn test_kind_and_module_filters()
{
    let (client, _) = client();
    let jar = sample_jar(&client);

    assert_eq!(names(&jar.filter_data_symbols()), vec!["environ"]);
    assert_eq!(jar.filter_code_symbols().len(), 4);
    assert_eq!(names(&jar.filter_by_module("libcrypto")), vec!["OpenSSL_version"]);
    assert!(jar.filter_by_module("libobjc").is_empty());
    assert_eq!(jar.filter_kind(SymbolKind::Unknown).module_of("scratch"), None);
    assert_eq!(jar.filter_by_module("libsystem_c").module_of("environ"), Some("libsystem_c.dylib"));
}

#[test]
fn test_union_and_difference()
{
    let (client, _) = client();
    let jar = sample_jar(&client);
    let code = jar.filter_code_symbols();
    let data = jar.filter_data_symbols();

    let both = &code + &data;
    assert_eq!(both.len(), 5);
    assert!(both.contains("environ"));

    let rest = &jar - &both;
    assert_eq!(names(&rest), vec!["scratch"]);
    assert_eq!(jar.union(&SymbolJar::new()), jar);
    assert!(jar.difference(&jar).is_empty());
}

#[test]
fn test_union_prefers_right_hand_binding()
{
    let (client, _) = client();
    let mut left = SymbolJar::new();
    left.insert("target", client.symbol(0x10u64), SymbolKind::Code, Some("old.dylib"));
    let mut right = SymbolJar::new();
    right.insert("target", client.symbol(0x20u64), SymbolKind::Data, None);

    let merged = left.union(&right);
    assert_eq!(merged.get("target").unwrap(), 0x20u64);
    assert_eq!(merged.module_of("target"), None);
}

#[test]
fn test_missing_name_is_lookup_error()
{
    let (client, _) = client();
    let jar = sample_jar(&client);
    assert!(matches!(jar.get("close"), Err(BurrowError::Lookup(name)) if name == "close"));
}

#[test]
fn test_name_of_prefers_plain_names()
{
    let (client, _) = client();
    let jar = sample_jar(&client);
    assert_eq!(jar.name_of(client.symbol(0x1000u64).address()), Some("open"));
    assert_eq!(jar.name_of(client.symbol(0x9999u64).address()), None);
}

#[test]
fn test_resolve_caches_backend_answers()
{
    let mut state = MockState::default();
    state.define_symbol("malloc", 0x7000);
    let (mut client, state) = client_with(state);

    let first = client.resolve("malloc").unwrap();
    let second = client.resolve("malloc").unwrap();
    assert_eq!(first, second);
    assert_eq!(state.borrow().lookups, vec!["malloc".to_string()]);
    assert_eq!(client.symbols().entry("malloc").unwrap().kind, SymbolKind::Unknown);
}

#[test]
fn test_resolve_failures_are_not_cached()
{
    let (mut client, state) = client();

    assert!(matches!(client.resolve("free"), Err(BurrowError::Lookup(_))));
    state.borrow_mut().define_symbol("free", 0x7100);
    assert_eq!(client.resolve("free").unwrap(), 0x7100u64);
    assert_eq!(state.borrow().lookups.len(), 2);
}

#[test]
fn test_resolve_passes_bare_name_for_module_hint()
{
    let mut state = MockState::default();
    state.define_symbol("strlen", 0x7200);
    let (mut client, state) = client_with(state);

    client.resolve("strlen{libsystem_platform.dylib}").unwrap();
    assert_eq!(state.borrow().lookups, vec!["strlen".to_string()]);
    assert_eq!(client.symbols().module_of("strlen{libsystem_platform.dylib}"), Some("libsystem_platform.dylib"));
}

#[test]
fn test_jar_monitor_labels_each_member()
{
    let (mut client, state) = client();
    let jar = sample_jar(&client).filter_starts_with("open", true).without_module_names();

    let ids = jar.monitor(&mut client, &MonitorSpec::new()).unwrap();
    assert_eq!(ids.len(), 2);
    let labels: Vec<String> = ids.iter().map(|id| client.breakpoint(*id).unwrap().label).collect();
    assert_eq!(labels, vec!["open".to_string(), "openat".to_string()]);
    assert!(ids.iter().all(|id| client.breakpoint(*id).unwrap().kind == BreakpointKind::Monitor));

    let outcome = hit(&mut client, &state, ids[1]).unwrap();
    let burrow_core::EventOutcome::Hit(report) = outcome else {
        panic!("expected a hit report");
    };
    assert_eq!(report.label, "openat");
}

#[test]
fn test_verbose_jar_monitor_captures_selector_arguments()
{
    let (mut client, _) = client();
    client.config_mut().verbose_monitor = true;

    let mut jar = SymbolJar::new();
    jar.insert("-[NSFileManager removeItemAtPath:]", client.symbol(0x5000u64), SymbolKind::Code, None);
    let ids = jar.monitor(&mut client, &MonitorSpec::new().with_register("x0", ValueFormat::Hex)).unwrap();

    let spec = client.breakpoint(ids[0]).unwrap().spec.unwrap();
    assert_eq!(spec.exprs.len(), 1);
    assert_eq!(spec.exprs[0].0, "$x2");
}

#[test]
fn test_jar_monitor_arms_aliases_once()
{
    let (mut client, _) = client();
    let jar = sample_jar(&client).filter_starts_with("open", true);
    assert_eq!(jar.len(), 3);

    let ids = jar.monitor(&mut client, &MonitorSpec::new()).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(client.breakpoints().len(), 2);
    let labels: Vec<String> = ids.iter().map(|id| client.breakpoint(*id).unwrap().label).collect();
    assert_eq!(labels, vec!["open".to_string(), "openat".to_string()]);
}
