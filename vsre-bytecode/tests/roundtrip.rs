use pretty_assertions::assert_eq;

use vsre_bytecode::{decode, ContainerBuilder, DecodedUnit, Value};

fn sample(revision: u32) -> ContainerBuilder {
    ContainerBuilder::new(revision)
        .base_type("Actor")
        .local_name("Enemy")
        .global_name("Enemy")
        .tool(true)
        .member("health")
        .member("speed")
        .static_value(Value::Int(3))
        .static_value(Value::Str("spawn_point".into()))
        .static_value(Value::Nil)
        .source("extends Actor\nvar health\nvar speed")
        .subclass(
            "Projectile",
            ContainerBuilder::new(revision)
                .base_type("Actor")
                .local_name("Projectile")
                .member("velocity"),
        )
}

/// Re-encode a decoded unit's metadata into a fresh builder, recursing into
/// nested ranges of the original buffer.
fn rebuild(unit: &DecodedUnit, buffer: &[u8]) -> ContainerBuilder {
    let mut b = ContainerBuilder::new(unit.revision)
        .base_type(unit.base_type_name.clone())
        .local_name(unit.local_name.clone())
        .global_name(unit.global_name.clone())
        .tool(unit.is_tool)
        .abstract_class(unit.is_abstract);
    for m in &unit.members {
        b = b.member(m.clone());
    }
    for v in &unit.static_variables {
        b = b.static_value(v.clone());
    }
    if let Some(src) = &unit.recovered_source {
        b = b.source(src.clone());
    }
    for sub in &unit.subclasses {
        let child = decode(&buffer[sub.byte_range()], Some(unit.revision)).unwrap();
        b = b.subclass(sub.name.clone(), rebuild(&child, &buffer[sub.byte_range()]));
    }
    b
}

#[test]
fn decode_is_idempotent_across_reencode() {
    for revision in [1, 2, 3] {
        let original = sample(revision).build().unwrap();
        let first = decode(&original, None).unwrap();

        let reencoded = rebuild(&first, &original).build().unwrap();
        let second = decode(&reencoded, None).unwrap();

        assert_eq!(first, second, "revision {}", revision);
    }
}

#[test]
fn structure_is_fully_extracted() {
    let buf = sample(2).build().unwrap();
    let unit = decode(&buf, None).unwrap();

    assert_eq!(unit.revision, 2);
    assert_eq!(unit.base_type_name, "Actor");
    assert_eq!(unit.local_name, "Enemy");
    assert_eq!(unit.global_name, "Enemy");
    assert!(unit.is_tool);
    assert!(!unit.is_abstract);
    assert_eq!(unit.members, vec!["health", "speed"]);
    assert_eq!(
        unit.static_variables,
        vec![
            Value::Int(3),
            Value::Str("spawn_point".into()),
            Value::Nil,
        ]
    );
    assert_eq!(unit.subclasses.len(), 1);
    assert_eq!(unit.subclasses[0].name, "Projectile");

    let sub = decode(&buf[unit.subclasses[0].byte_range()], Some(2)).unwrap();
    assert_eq!(sub.local_name, "Projectile");
    assert_eq!(sub.members, vec!["velocity"]);
}

#[test]
fn source_recovery_depends_on_revision_rules() {
    let under_rev1 = sample(1).build().unwrap();
    let under_rev2 = sample(2).build().unwrap();

    let one = decode(&under_rev1, None).unwrap();
    let two = decode(&under_rev2, None).unwrap();

    // The same logical class compiled under each revision: identical
    // structure, but only the debug-carrying revision retains text.
    assert_eq!(one.members, two.members);
    assert_eq!(one.static_variables, two.static_variables);
    assert_eq!(one.recovered_source, None);
    assert_eq!(
        two.recovered_source.as_deref(),
        Some("extends Actor\nvar health\nvar speed")
    );
}

#[test]
fn declaration_order_is_preserved() {
    let buf = ContainerBuilder::new(3)
        .member("zeta")
        .member("alpha")
        .member("mid")
        .subclass("B", ContainerBuilder::new(3))
        .subclass("A", ContainerBuilder::new(3))
        .build()
        .unwrap();
    let unit = decode(&buf, None).unwrap();
    assert_eq!(unit.members, vec!["zeta", "alpha", "mid"]);
    let names: Vec<&str> = unit.subclasses.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["B", "A"]);
}
