use nowdb::{
    AstExpr, EdgeInsert, PropertyDecl, Scope, SelectStmt, Value, ValueType, EOROW,
};
use std::time::Duration;

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

fn sales_scope(dir: &std::path::Path) -> Scope {
    let path = dir.join("db");
    Scope::create(&path).unwrap();
    let scope = Scope::open(&path).unwrap();

    scope
        .create_type("Person", &[PropertyDecl::pk("id", ValueType::Uint)])
        .unwrap();
    scope
        .create_edge(
            "sales",
            "Person",
            "Person",
            ValueType::Nothing,
            ValueType::Uint,
            ValueType::Nothing,
        )
        .unwrap();
    scope
}

fn edge(origin: u64, destin: u64, ts: i64, weight: u64) -> EdgeInsert {
    EdgeInsert {
        origin,
        destin,
        timestamp: ts,
        label: None,
        weight: Some(Value::Uint(weight)),
        weight2: None,
    }
}

#[test_log::test]
fn filter_by_origin_and_time_window() {
    let dir = tempfile::tempdir().unwrap();
    let scope = sales_scope(dir.path());

    scope.insert_edge("sales", &edge(1, 2, 10, 0)).unwrap();
    scope.insert_edge("sales", &edge(1, 3, 20, 0)).unwrap();
    scope.insert_edge("sales", &edge(2, 3, 30, 0)).unwrap();

    let filter = AstExpr::binop(
        "and",
        AstExpr::binop("=", AstExpr::field("origin"), AstExpr::uint(1)),
        AstExpr::binop(
            "and",
            AstExpr::binop(">=", AstExpr::field("timestamp"), AstExpr::time(10)),
            AstExpr::binop("<=", AstExpr::field("timestamp"), AstExpr::time(25)),
        ),
    );

    let stmt = SelectStmt::new(
        "sales",
        vec![AstExpr::field("origin"), AstExpr::field("destin")],
    )
    .filter(filter);
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 8192];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(2, count);

    let destins: Vec<u64> = parse_rows(&buf[..n])
        .iter()
        .map(|row| uint(&row[1].1))
        .collect();
    assert_eq!(vec![2, 3], destins);
}

#[test_log::test]
fn grouped_sum_in_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let scope = sales_scope(dir.path());
    scope.create_index("xorig", "sales", &["origin"]).unwrap();

    let data = [(1u64, 10u64), (1, 20), (2, 30), (2, 40), (2, 50), (3, 60)];
    for (i, (origin, weight)) in data.iter().enumerate() {
        scope
            .insert_edge("sales", &edge(*origin, 9, i as i64, *weight))
            .unwrap();
    }

    let stmt = SelectStmt::new(
        "sales",
        vec![
            AstExpr::field("origin"),
            AstExpr::fun("sum", vec![AstExpr::field("weight")]),
        ],
    )
    .group_by(vec![AstExpr::field("origin")]);
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 8192];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(3, count);

    let groups: Vec<(u64, u64)> = parse_rows(&buf[..n])
        .iter()
        .map(|row| (uint(&row[0].1), uint(&row[1].1)))
        .collect();
    assert_eq!(vec![(1, 30), (2, 120), (3, 60)], groups);
}

#[test_log::test]
fn grouped_count_uses_key_counts() {
    let dir = tempfile::tempdir().unwrap();
    let scope = sales_scope(dir.path());
    scope.create_index("xorig", "sales", &["origin"]).unwrap();

    for (i, origin) in [1u64, 1, 2, 2, 2, 3].iter().enumerate() {
        scope
            .insert_edge("sales", &edge(*origin, 9, i as i64, 0))
            .unwrap();
    }

    let stmt = SelectStmt::new(
        "sales",
        vec![AstExpr::field("origin"), AstExpr::fun("count", vec![])],
    )
    .group_by(vec![AstExpr::field("origin")]);
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut buf = vec![0u8; 8192];
    let (n, count) = cursor.fetch(&mut buf).unwrap();
    assert_eq!(3, count);

    let groups: Vec<(u64, u64)> = parse_rows(&buf[..n])
        .iter()
        .map(|row| (uint(&row[0].1), uint(&row[1].1)))
        .collect();
    assert_eq!(vec![(1, 2), (2, 3), (3, 1)], groups);
}

#[test_log::test]
fn index_search_after_sorting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    Scope::create(&path).unwrap();
    // two pages per file, so the writer swaps every 256 records
    let scope = Scope::open_with_filesize(&path, 2 * 8192).unwrap();

    scope
        .create_type("Person", &[PropertyDecl::pk("id", ValueType::Uint)])
        .unwrap();
    scope
        .create_edge(
            "sales",
            "Person",
            "Person",
            ValueType::Nothing,
            ValueType::Uint,
            ValueType::Nothing,
        )
        .unwrap();
    scope.create_index("xorig", "sales", &["origin"]).unwrap();

    for i in 0..600u64 {
        scope
            .insert_edge("sales", &edge(i % 5, i, i as i64, i))
            .unwrap();
    }
    assert!(scope.wait_sorted(Duration::from_secs(30)).unwrap());

    let stmt = SelectStmt::new(
        "sales",
        vec![AstExpr::field("origin"), AstExpr::field("destin")],
    )
    .filter(AstExpr::binop("=", AstExpr::field("origin"), AstExpr::uint(2)));
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut total = 0;
    let mut buf = vec![0u8; 8192];
    loop {
        match cursor.fetch(&mut buf) {
            Ok((n, count)) => {
                total += count;
                for row in parse_rows(&buf[..n]) {
                    assert_eq!(2, uint(&row[0].1));
                    assert_eq!(2, uint(&row[1].1) % 5);
                }
            }
            Err(e) => {
                assert!(e.is_eof());
                break;
            }
        }
    }
    assert_eq!(120, total);
}

#[test_log::test]
fn descending_order_over_sorted_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    Scope::create(&path).unwrap();
    let scope = Scope::open_with_filesize(&path, 2 * 8192).unwrap();

    scope
        .create_type("Person", &[PropertyDecl::pk("id", ValueType::Uint)])
        .unwrap();
    scope
        .create_edge(
            "sales",
            "Person",
            "Person",
            ValueType::Nothing,
            ValueType::Uint,
            ValueType::Nothing,
        )
        .unwrap();
    scope.create_index("xorig", "sales", &["origin"]).unwrap();

    // exactly one writer's worth, so nothing stays pending
    for i in 0..256u64 {
        scope
            .insert_edge("sales", &edge(i, i, i as i64, 0))
            .unwrap();
    }
    assert!(scope.wait_sorted(Duration::from_secs(30)).unwrap());

    let stmt = SelectStmt::new("sales", vec![AstExpr::field("origin")])
        .order_by(vec![AstExpr::fun("desc", vec![AstExpr::field("origin")])]);
    let mut cursor = scope.execute(&stmt).unwrap();

    let mut origins = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        match cursor.fetch(&mut buf) {
            Ok((n, _)) => {
                origins.extend(parse_rows(&buf[..n]).iter().map(|row| uint(&row[0].1)));
            }
            Err(e) => {
                assert!(e.is_eof());
                break;
            }
        }
    }

    assert_eq!(256, origins.len());
    assert_eq!(255, origins[0]);
    assert!(origins.windows(2).all(|w| w[0] > w[1]));
}

#[test_log::test]
fn unknown_context_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let scope = sales_scope(dir.path());

    let stmt = SelectStmt::new("nope", vec![AstExpr::field("origin")]);
    assert!(matches!(
        scope.execute(&stmt),
        Err(nowdb::Error::KeyNotFound(_))
    ));
}
