use codex_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use codex_identity::{
    authenticate, create_session, create_user, list_users, purge_expired_sessions,
    revoke_session, set_active, set_role, update_display_name, user_for_session, IdentityError,
    NewUser,
};
use codex_types::Role;

const ITER: u32 = 1_000;

fn setup() -> DbPool {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    run_migrations(&conn).unwrap();
    drop(conn);
    pool
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password: "s3cret-password".to_string(),
        display_name: "Coach".to_string(),
    }
}

#[test]
fn first_user_is_admin_rest_are_users() {
    let pool = setup();
    let conn = pool.get().unwrap();

    let founder = create_user(&conn, &new_user("founder@example.com"), ITER).unwrap();
    assert_eq!(founder.role, Role::Admin);
    assert!(founder.active);

    let second = create_user(&conn, &new_user("second@example.com"), ITER).unwrap();
    assert_eq!(second.role, Role::User);

    assert_eq!(list_users(&conn).unwrap().len(), 2);
}

#[test]
fn duplicate_email_is_rejected_case_insensitively() {
    let pool = setup();
    let conn = pool.get().unwrap();

    create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();
    let err = create_user(&conn, &new_user("COACH@example.com"), ITER).unwrap_err();
    assert!(matches!(err, IdentityError::EmailTaken));
}

#[test]
fn short_password_is_rejected() {
    let pool = setup();
    let conn = pool.get().unwrap();

    let mut input = new_user("coach@example.com");
    input.password = "short".to_string();
    let err = create_user(&conn, &input, ITER).unwrap_err();
    assert!(matches!(err, IdentityError::WeakPassword));
}

#[test]
fn authenticate_checks_password_and_records_login() {
    let pool = setup();
    let conn = pool.get().unwrap();
    let user = create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();
    assert!(user.last_login_at.is_none());

    let logged_in = authenticate(&conn, " Coach@Example.com", "s3cret-password").unwrap();
    assert_eq!(logged_in.id, user.id);
    assert!(logged_in.last_login_at.is_some());

    let err = authenticate(&conn, "coach@example.com", "wrong-password").unwrap_err();
    assert!(matches!(err, IdentityError::InvalidCredentials));

    let err = authenticate(&conn, "nobody@example.com", "s3cret-password").unwrap_err();
    assert!(matches!(err, IdentityError::InvalidCredentials));
}

#[test]
fn sessions_resolve_and_revoke() {
    let pool = setup();
    let conn = pool.get().unwrap();
    let user = create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();

    let token = create_session(&conn, &user.id, 24).unwrap();
    let resolved = user_for_session(&conn, &token).unwrap();
    assert_eq!(resolved.id, user.id);

    assert!(revoke_session(&conn, &token).unwrap());
    let err = user_for_session(&conn, &token).unwrap_err();
    assert!(matches!(err, IdentityError::SessionInvalid));
}

#[test]
fn expired_sessions_are_invalid_and_purged() {
    let pool = setup();
    let conn = pool.get().unwrap();
    let user = create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();
    let token = create_session(&conn, &user.id, 1).unwrap();

    conn.execute(
        "UPDATE sessions SET expires_at = datetime('now', '-1 minute')",
        [],
    )
    .unwrap();

    assert!(matches!(
        user_for_session(&conn, &token),
        Err(IdentityError::SessionInvalid)
    ));
    assert_eq!(purge_expired_sessions(&conn).unwrap(), 1);
}

#[test]
fn deactivation_revokes_sessions_and_blocks_login() {
    let pool = setup();
    let conn = pool.get().unwrap();
    let _admin = create_user(&conn, &new_user("admin@example.com"), ITER).unwrap();
    let user = create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();
    let token = create_session(&conn, &user.id, 24).unwrap();

    let updated = set_active(&conn, &user.id, false).unwrap();
    assert!(!updated.active);
    assert!(user_for_session(&conn, &token).is_err());

    let err = authenticate(&conn, "coach@example.com", "s3cret-password").unwrap_err();
    assert!(matches!(err, IdentityError::Inactive));
}

#[test]
fn last_admin_cannot_be_demoted_or_deactivated() {
    let pool = setup();
    let conn = pool.get().unwrap();
    let admin = create_user(&conn, &new_user("admin@example.com"), ITER).unwrap();
    let user = create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();

    assert!(matches!(
        set_role(&conn, &admin.id, Role::User),
        Err(IdentityError::LastAdmin)
    ));
    assert!(matches!(
        set_active(&conn, &admin.id, false),
        Err(IdentityError::LastAdmin)
    ));

    // With a second admin in place the first may step down.
    set_role(&conn, &user.id, Role::Admin).unwrap();
    let demoted = set_role(&conn, &admin.id, Role::User).unwrap();
    assert_eq!(demoted.role, Role::User);
}

#[test]
fn update_display_name_validates() {
    let pool = setup();
    let conn = pool.get().unwrap();
    let user = create_user(&conn, &new_user("coach@example.com"), ITER).unwrap();

    let updated = update_display_name(&conn, &user.id, "  Jordan ").unwrap();
    assert_eq!(updated.display_name, "Jordan");

    assert!(matches!(
        update_display_name(&conn, &user.id, ""),
        Err(IdentityError::InvalidDisplayName)
    ));
    assert!(matches!(
        update_display_name(&conn, "missing", "Name"),
        Err(IdentityError::UserNotFound(_))
    ));
}
