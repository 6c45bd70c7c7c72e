use nowdb::{AstExpr, PropertyDecl, Scope, SelectStmt, Value, ValueType, EOROW};

/// Splits a framed fetch buffer into rows of (tag, payload) fields.
fn parse_rows(buf: &[u8]) -> Vec<Vec<(u8, Vec<u8>)>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut i = 0;

    while i < buf.len() {
        let tag = buf[i];
        i += 1;

        if tag == EOROW {
            rows.push(std::mem::take(&mut row));
            continue;
        }

        let payload = match tag {
            t if t == ValueType::Text as u8 => {
                let start = i;
                while buf[i] != 0 {
                    i += 1;
                }
                let p = buf[start..i].to_vec();
                i += 1;
                p
            }
            t if t == ValueType::Bool as u8 => {
                let p = buf[i..=i].to_vec();
                i += 1;
                p
            }
            _ => {
                let p = buf[i..i + 8].to_vec();
                i += 8;
                p
            }
        };
        row.push((tag, payload));
    }

    rows
}

fn uint(payload: &[u8]) -> u64 {
    u64::from_le_bytes(payload.try_into().unwrap())
}

fn person_scope(dir: &std::path::Path) -> Scope {
    let path = dir.join("db");
    Scope::create(&path).unwrap();
    let scope = Scope::open(&path).unwrap();
    scope
        .create_type(
            "Person",
            &[
                PropertyDecl::pk("id", ValueType::Uint),
                PropertyDecl::plain("name", ValueType::Text),
            ],
        )
        .unwrap();
    scope
}

#[test_log::test]
fn create_load_scan() {
    let dir = tempfile::tempdir().unwrap();
    let scope = person_scope(dir.path());

    for (id, name) in [(1u64, "a"), (2, "b"), (3, "c")] {
        scope
            .insert_vertex(
                "Person",
                &[("id", Value::Uint(id)), ("name", Value::Text(name.into()))],
            )
            .unwrap();
    }

    let stmt = SelectStmt::new(
        "Person",
        vec![AstExpr::field("id"), AstExpr::field("name")],
    );
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 8192];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(3, count);

    let rows = parse_rows(&buf[..n]);
    assert_eq!(3, rows.len());

    for (row, (id, name)) in rows.iter().zip([(1u64, "a"), (2, "b"), (3, "c")]) {
        assert_eq!(ValueType::Uint as u8, row[0].0);
        assert_eq!(id, uint(&row[0].1));
        assert_eq!(ValueType::Text as u8, row[1].0);
        assert_eq!(name.as_bytes(), &*row[1].1);
    }

    assert!(cursor.fetch(&mut buf).unwrap_err().is_eof());
    // fetch after EOF keeps returning EOF
    assert!(cursor.fetch(&mut buf).unwrap_err().is_eof());
}

#[test_log::test]
fn in_list_on_primary_key() {
    let dir = tempfile::tempdir().unwrap();
    let scope = person_scope(dir.path());

    for id in 1..=10u64 {
        scope
            .insert_vertex(
                "Person",
                &[
                    ("id", Value::Uint(id)),
                    ("name", Value::Text(format!("p{id}"))),
                ],
            )
            .unwrap();
    }

    let stmt = SelectStmt::new("Person", vec![AstExpr::field("name")]).filter(AstExpr::fun(
        "in",
        vec![
            AstExpr::field("id"),
            AstExpr::uint(2),
            AstExpr::uint(3),
            AstExpr::uint(5),
            AstExpr::uint(7),
        ],
    ));
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 8192];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(4, count);

    let names: Vec<String> = parse_rows(&buf[..n])
        .iter()
        .map(|row| String::from_utf8(row[0].1.clone()).unwrap())
        .collect();
    assert_eq!(vec!["p2", "p3", "p5", "p7"], names);
}

#[test_log::test]
fn missing_properties_read_as_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let scope = person_scope(dir.path());

    scope
        .insert_vertex("Person", &[("id", Value::Uint(9))])
        .unwrap();

    let stmt = SelectStmt::new(
        "Person",
        vec![AstExpr::field("id"), AstExpr::field("name")],
    );
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 8192];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(1, count);

    let rows = parse_rows(&buf[..n]);
    assert_eq!(9, uint(&rows[0][0].1));
    assert_eq!(ValueType::Nothing as u8, rows[0][1].0);
}

#[test_log::test]
fn small_buffers_carry_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let scope = person_scope(dir.path());

    for id in 1..=5u64 {
        scope
            .insert_vertex(
                "Person",
                &[
                    ("id", Value::Uint(id)),
                    ("name", Value::Text("same".into())),
                ],
            )
            .unwrap();
    }

    let stmt = SelectStmt::new(
        "Person",
        vec![AstExpr::field("id"), AstExpr::field("name")],
    );
    let mut cursor = scope.execute(&stmt).unwrap();

    // one row is tag+8 + tag+"same\0" + EOROW = 16 bytes; a 20-byte
    // buffer holds exactly one row per fetch
    let mut ids = Vec::new();
    let mut buf = vec![0u8; 20];
    loop {
        match cursor.fetch(&mut buf) {
            Ok((n, count)) => {
                assert_eq!(1, count);
                ids.push(uint(&parse_rows(&buf[..n])[0][0].1));
            }
            Err(e) => {
                assert!(e.is_eof());
                break;
            }
        }
    }

    assert_eq!(vec![1, 2, 3, 4, 5], ids);
}

#[test_log::test]
fn count_without_grouping() {
    let dir = tempfile::tempdir().unwrap();
    let scope = person_scope(dir.path());

    for id in 1..=7u64 {
        scope
            .insert_vertex("Person", &[("id", Value::Uint(id))])
            .unwrap();
    }

    let stmt = SelectStmt::new("Person", vec![AstExpr::fun("count", vec![])]);
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 1024];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(1, count);
    assert_eq!(7, uint(&parse_rows(&buf[..n])[0][0].1));
}

#[test_log::test]
fn duplicate_primary_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let scope = person_scope(dir.path());

    scope
        .insert_vertex("Person", &[("id", Value::Uint(1))])
        .unwrap();
    let err = scope
        .insert_vertex("Person", &[("id", Value::Uint(1))])
        .unwrap_err();
    assert!(matches!(err, nowdb::Error::DupKey(_)));
}

#[test_log::test]
fn text_primary_keys_use_surrogates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    Scope::create(&path).unwrap();
    let scope = Scope::open(&path).unwrap();

    scope
        .create_type(
            "City",
            &[
                PropertyDecl::pk("name", ValueType::Text),
                PropertyDecl::plain("pop", ValueType::Uint),
            ],
        )
        .unwrap();

    scope
        .insert_vertex(
            "City",
            &[
                ("name", Value::Text("lisbon".into())),
                ("pop", Value::Uint(545_000)),
            ],
        )
        .unwrap();

    let stmt = SelectStmt::new("City", vec![AstExpr::field("pop")]).filter(AstExpr::binop(
        "=",
        AstExpr::field("name"),
        AstExpr::text("lisbon"),
    ));
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 1024];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(1, count);
    assert_eq!(545_000, uint(&parse_rows(&buf[..n])[0][0].1));

    // a name the dictionary never saw matches nothing
    let stmt = SelectStmt::new("City", vec![AstExpr::field("pop")]).filter(AstExpr::binop(
        "=",
        AstExpr::field("name"),
        AstExpr::text("atlantis"),
    ));
    let mut cursor = scope.execute(&stmt).unwrap();
    assert!(cursor.fetch(&mut buf).unwrap_err().is_eof());
}
