use licensegate::error::AppError;
use licensegate::registry;

use crate::common::*;

#[test]
fn test_find_by_key_is_exact() {
    let db = test_db();
    let conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "ABC-123", &product.id, None, LicenseType::Regular);

    let found = registry::find_by_key(&conn, "ABC-123").unwrap();
    assert_eq!(found.id, license.id);
    assert_eq!(found.key, "ABC-123");

    // No case folding or dash stripping
    assert!(matches!(
        registry::find_by_key(&conn, "abc-123"),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        registry::find_by_key(&conn, "ABC123"),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn test_register_domain_twice_returns_same_row() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-7", &product.id, None, LicenseType::Regular);

    let first = registry::register_domain(&mut conn, &license.id, "example.com").unwrap();
    let second = registry::register_domain(&mut conn, &license.id, "example.com").unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.status, DomainStatus::Active);
    assert_eq!(second.status, DomainStatus::Active);
    assert_eq!(registry::list_domains(&conn, &license.id).unwrap().len(), 1);
}

#[test]
fn test_register_domain_cleans_before_matching() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-8", &product.id, None, LicenseType::Regular);

    let first = registry::register_domain(&mut conn, &license.id, "https://www.Example.com/").unwrap();
    let second = registry::register_domain(&mut conn, &license.id, "example.com").unwrap();

    assert_eq!(first.domain_name, "example.com");
    assert_eq!(first.id, second.id);
}

#[test]
fn test_register_domain_rejects_invalid_domain() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-9", &product.id, None, LicenseType::Regular);

    let result = registry::register_domain(&mut conn, &license.id, "not a domain");
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[test]
fn test_register_domain_unknown_license() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();

    let result = registry::register_domain(&mut conn, "missing", "example.com");
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[test]
fn test_register_domain_enforces_limit() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-R", &product.id, None, LicenseType::Regular);

    registry::register_domain(&mut conn, &license.id, "one.com").unwrap();
    let result = registry::register_domain(&mut conn, &license.id, "two.com");
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    // Re-registering the existing domain still works at the limit
    assert!(registry::register_domain(&mut conn, &license.id, "one.com").is_ok());
}

#[test]
fn test_developer_license_has_no_domain_limit() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-D", &product.id, None, LicenseType::Developer);
    assert_eq!(license.max_domains, None);

    for i in 0..12 {
        registry::register_domain(&mut conn, &license.id, &format!("site{}.com", i)).unwrap();
    }
    assert_eq!(registry::list_domains(&conn, &license.id).unwrap().len(), 12);
}

#[test]
fn test_pending_domain_is_activated_and_blocked_is_kept() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-E", &product.id, None, LicenseType::Extended);

    let pending =
        queries::insert_domain(&conn, &license.id, "pending.com", DomainStatus::Pending).unwrap();
    let blocked =
        queries::insert_domain(&conn, &license.id, "blocked.com", DomainStatus::Blocked).unwrap();

    let activated = registry::register_domain(&mut conn, &license.id, "pending.com").unwrap();
    assert_eq!(activated.id, pending.id);
    assert_eq!(activated.status, DomainStatus::Active);
    assert!(activated.last_checked_at.is_some());

    let still_blocked = registry::register_domain(&mut conn, &license.id, "blocked.com").unwrap();
    assert_eq!(still_blocked.id, blocked.id);
    assert_eq!(still_blocked.status, DomainStatus::Blocked);
}

#[test]
fn test_pending_domain_respects_domain_limit() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-RP", &product.id, None, LicenseType::Regular);

    registry::register_domain(&mut conn, &license.id, "first.com").unwrap();
    queries::insert_domain(&conn, &license.id, "pending.com", DomainStatus::Pending).unwrap();

    let result = registry::register_domain(&mut conn, &license.id, "pending.com");
    match result {
        Err(AppError::Forbidden(msg)) => assert!(msg.contains("1/1")),
        other => panic!("expected Forbidden, got {:?}", other),
    }

    let statuses: Vec<(String, DomainStatus)> = registry::list_domains(&conn, &license.id)
        .unwrap()
        .into_iter()
        .map(|d| (d.domain_name, d.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("first.com".to_string(), DomainStatus::Active),
            ("pending.com".to_string(), DomainStatus::Pending),
        ]
    );
}

#[test]
fn test_list_domains_oldest_first() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-L", &product.id, None, LicenseType::Extended);

    for name in ["a.com", "b.com", "c.com"] {
        registry::register_domain(&mut conn, &license.id, name).unwrap();
    }
    let names: Vec<String> = registry::list_domains(&conn, &license.id)
        .unwrap()
        .into_iter()
        .map(|d| d.domain_name)
        .collect();
    assert_eq!(names, vec!["a.com", "b.com", "c.com"]);
}

#[test]
fn test_concurrent_registration_yields_one_row() {
    let db = test_db();
    let license_id = {
        let conn = db.pool.get().unwrap();
        let product = create_test_product(&conn, "theme", None);
        create_test_license(&conn, "KEY-C", &product.id, None, LicenseType::Regular).id
    };

    let ids: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = db.pool.clone();
                let license_id = license_id.clone();
                s.spawn(move || {
                    let mut conn = pool.get().unwrap();
                    registry::register_domain(&mut conn, &license_id, "race.com")
                        .unwrap()
                        .id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    let conn = db.pool.get().unwrap();
    assert_eq!(registry::list_domains(&conn, &license_id).unwrap().len(), 1);
}

#[test]
fn test_wildcard_domain_authorization() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-W", &product.id, None, LicenseType::Regular);

    registry::register_domain(&mut conn, &license.id, "*.example.com").unwrap();

    assert!(registry::domain_authorized(&conn, &license.id, "example.com").unwrap());
    assert!(registry::domain_authorized(&conn, &license.id, "https://shop.example.com").unwrap());
    assert!(!registry::domain_authorized(&conn, &license.id, "example.org").unwrap());
    assert!(!registry::domain_authorized(&conn, &license.id, "notexample.com").unwrap());
}

#[test]
fn test_blocked_domain_is_not_authorized() {
    let db = test_db();
    let conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-B", &product.id, None, LicenseType::Regular);
    queries::insert_domain(&conn, &license.id, "evil.com", DomainStatus::Blocked).unwrap();

    assert!(!registry::domain_authorized(&conn, &license.id, "evil.com").unwrap());
}

#[test]
fn test_set_status_transitions() {
    let db = test_db();
    let conn = db.pool.get().unwrap();
    let product = create_test_product(&conn, "theme", None);
    let license = create_test_license(&conn, "KEY-S", &product.id, None, LicenseType::Regular);
    let now = chrono::Utc::now().timestamp();

    let suspended = registry::set_status(&conn, &license.id, LicenseStatus::Suspended).unwrap();
    assert_eq!(suspended.status, LicenseStatus::Suspended);
    assert!(!suspended.is_active(now));

    let reactivated = registry::set_status(&conn, &license.id, LicenseStatus::Active).unwrap();
    assert!(reactivated.is_active(now));

    assert!(matches!(
        registry::set_status(&conn, "missing", LicenseStatus::Expired),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn test_user_has_active_license() {
    let db = test_db();
    let conn = db.pool.get().unwrap();
    let (user, _) = create_test_user(&conn, "owner@example.com");
    let product = create_test_product(&conn, "theme", None);
    let other = create_test_product(&conn, "plugin", None);
    let license = create_test_license(&conn, "KEY-U", &product.id, Some(&user.id), LicenseType::Regular);

    assert!(registry::user_has_active_license(&conn, &user.id, &product.id).unwrap());
    assert!(!registry::user_has_active_license(&conn, &user.id, &other.id).unwrap());

    registry::set_status(&conn, &license.id, LicenseStatus::Suspended).unwrap();
    assert!(!registry::user_has_active_license(&conn, &user.id, &product.id).unwrap());

    assert_eq!(registry::licenses_for_user(&conn, &user.id).unwrap().len(), 1);
}

#[test]
fn test_lapsed_license_does_not_count_as_owned() {
    let db = test_db();
    let conn = db.pool.get().unwrap();
    let (user, _) = create_test_user(&conn, "trial@example.com");
    let product = create_test_product(&conn, "theme", None);
    let past = chrono::Utc::now().timestamp() - 60;

    queries::create_license(
        &conn,
        &CreateLicense {
            key: "TRIAL-1".into(),
            product_id: product.id.clone(),
            owner_id: Some(user.id.clone()),
            license_type: LicenseType::Trial,
            support_expires_at: Some(past),
            license_expires_at: Some(past),
        },
    )
    .unwrap();

    assert!(!registry::user_has_active_license(&conn, &user.id, &product.id).unwrap());
    let license = registry::find_by_key(&conn, "TRIAL-1").unwrap();
    assert_eq!(license.effective_status(past + 120), LicenseStatus::Expired);
}

#[test]
fn test_import_marketplace_license_is_idempotent_and_claims_owner() {
    let db = test_db();
    let mut conn = db.pool.get().unwrap();
    let (user, _) = create_test_user(&conn, "buyer@example.com");
    let product = create_test_product(&conn, "theme", Some("12345"));
    let info = buyer("12345");

    let unclaimed =
        registry::import_marketplace_license(&mut conn, "mk-code-1", &product.id, None, &info).unwrap();
    assert_eq!(unclaimed.owner_id, None);
    assert_eq!(unclaimed.license_type, LicenseType::Regular);
    assert_eq!(unclaimed.support_expires_at, Some(1893456000));
    assert_eq!(unclaimed.license_expires_at, None);

    let claimed = registry::import_marketplace_license(
        &mut conn,
        "mk-code-1",
        &product.id,
        Some(&user.id),
        &info,
    )
    .unwrap();
    assert_eq!(claimed.id, unclaimed.id);
    assert_eq!(claimed.owner_id.as_deref(), Some(user.id.as_str()));
    assert!(registry::user_has_active_license(&conn, &user.id, &product.id).unwrap());
}
