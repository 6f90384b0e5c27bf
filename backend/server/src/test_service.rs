use lapfin_workflow::{
    ApplicationStatus as S, AuditAction, Decision, PaymentStatus, PaymentType, Role, WorkflowError,
};

use async_trait::async_trait;
use axum::http::StatusCode;
use sqlx::SqlitePool;

use crate::audit::{self, AuditFilter};
use crate::db;
use crate::errors::{Result, ServerError};
use crate::gateway::{Checkout, CheckoutRequest, GatewayOutcome, PaymentGateway};
use crate::models::{
    ApplicationView, ConfirmDeliveryRequest, LaptopPatch, NewApplication, NewUniversity,
    ReviewRequest,
};
use crate::service;
use crate::test_support::{FakeGateway, World, LAPTOP_PRICE};

fn payment(view: &ApplicationView, kind: PaymentType) -> (PaymentStatus, i64) {
    let p = view
        .payments
        .iter()
        .find(|p| p.payment_type == kind)
        .expect("payment row");
    (p.status, p.amount)
}

fn reject(reason: &str) -> ReviewRequest {
    ReviewRequest {
        decision: Decision::Reject,
        reason: Some(reason.to_string()),
    }
}

#[tokio::test]
async fn test_application_starts_pending_with_split_payments() {
    let world = World::new().await;
    let view = world.apply_as(&world.student).await.unwrap();

    assert_eq!(view.status, S::PendingSrc);
    assert!(view.reference.starts_with("LAP-"));
    assert!(view.reference.ends_with("-000001"));
    assert_eq!(view.pricing.total_price, LAPTOP_PRICE);
    assert_eq!(payment(&view, PaymentType::Initial70), (PaymentStatus::Pending, 350_000));
    assert_eq!(payment(&view, PaymentType::Final30), (PaymentStatus::Pending, 150_000));
    assert_eq!(view.student.full_name, "Ama Student");
    assert_eq!(view.student.student_number.as_deref(), Some("UG-10001"));
    assert_eq!(view.documents, World::documents());
    assert_eq!(view.next_statuses, vec![S::Withdrawn]);

    let trail = world.trail(view.id).await;
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, AuditAction::ApplicationCreated);
    assert_eq!(trail[0].actor_role, Role::Student);
    assert_eq!(trail[0].details["initial_amount"], 350_000);
}

#[tokio::test]
async fn test_full_lifecycle_records_every_step() {
    let world = World::new().await;
    let gateway = FakeGateway::default();
    let id = world.delivered_application().await;

    let view = world.view_as_admin(id).await;
    assert_eq!(view.status, S::Delivered);
    assert_eq!(payment(&view, PaymentType::Initial70).0, PaymentStatus::Collected);
    let delivery = view.delivery.expect("delivery record");
    assert_eq!(delivery.delivery_user_id, world.courier.id);
    assert!(delivery.delivered_at.is_some());

    let checkout = world.initiate_final(&gateway, id).await;
    assert_eq!(checkout.amount, 150_000);
    assert!(checkout.authorization_url.ends_with(&checkout.reference));
    assert_eq!(
        gateway.checkouts.lock().unwrap()[0].email,
        world.student.email
    );

    gateway.set_outcome(&checkout.reference, GatewayOutcome::Success { amount: 150_000 });
    let view = service::verify_final_payment(&world.pool, &gateway, &world.student, id)
        .await
        .unwrap();
    assert_eq!(view.status, S::Completed);
    assert_eq!(payment(&view, PaymentType::Final30).0, PaymentStatus::Verified);
    assert_eq!(payment(&view, PaymentType::Initial70).0, PaymentStatus::Collected);
    assert!(view.next_statuses.is_empty());

    let mut actions: Vec<AuditAction> = world.trail(id).await.iter().map(|e| e.action).collect();
    actions.reverse();
    assert_eq!(
        actions,
        vec![
            AuditAction::ApplicationCreated,
            AuditAction::SrcApproved,
            AuditAction::AdminApproved,
            AuditAction::DeliveryAssigned,
            AuditAction::DeliveryConfirmed,
            AuditAction::InitialPaymentCollected,
            AuditAction::FinalPaymentInitiated,
            AuditAction::FinalPaymentVerified,
            AuditAction::ApplicationCompleted,
        ]
    );

    // Admin approval reserved one unit.
    let laptop = service::get_laptop(&world.pool, &world.admin, world.laptop.id)
        .await
        .unwrap();
    assert_eq!(laptop.stock, world.laptop.stock - 1);
}

#[tokio::test]
async fn test_only_students_apply() {
    let world = World::new().await;
    let err = world.apply_as(&world.admin).await.unwrap_err();
    assert!(matches!(err, ServerError::Forbidden(_)));
}

#[tokio::test]
async fn test_application_needs_documents() {
    let world = World::new().await;
    let err = service::create_application(
        &world.pool,
        &world.student,
        &NewApplication {
            laptop_id: world.laptop.id,
            documents: vec![],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));
}

#[tokio::test]
async fn test_one_open_application_per_student() {
    let world = World::new().await;
    let first = world.application().await;
    let err = world.apply_as(&world.student).await.unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    // Once the first is withdrawn the student may apply again.
    service::withdraw(&world.pool, &world.student, first)
        .await
        .unwrap();
    let second = world.apply_as(&world.student).await.unwrap();
    assert_ne!(second.id, first);
}

#[tokio::test]
async fn test_inactive_university_blocks_applications_and_catalog() {
    let world = World::new().await;
    service::set_university_active(&world.pool, &world.admin, world.university_id, false)
        .await
        .unwrap();

    let err = world.apply_as(&world.student).await.unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    let catalog = service::list_laptops(&world.pool, &world.student)
        .await
        .unwrap();
    assert!(catalog.is_empty());
    let err = service::get_laptop(&world.pool, &world.student, world.laptop.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));

    let catalog = service::list_laptops(&world.pool, &world.admin).await.unwrap();
    assert_eq!(catalog.len(), 1);
}

#[tokio::test]
async fn test_inactive_or_empty_laptops_cannot_be_chosen() {
    let world = World::new().await;
    service::update_laptop(
        &world.pool,
        &world.admin,
        world.laptop.id,
        &LaptopPatch {
            stock: Some(0),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let err = world.apply_as(&world.student).await.unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    service::update_laptop(
        &world.pool,
        &world.admin,
        world.laptop.id,
        &LaptopPatch {
            stock: Some(5),
            active: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let err = world.apply_as(&world.student).await.unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));
    assert!(service::list_laptops(&world.pool, &world.student)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_src_only_reviews_own_university() {
    let world = World::new().await;
    let id = world.application().await;

    let other = service::create_university(
        &world.pool,
        &world.admin,
        &crate::models::NewUniversity {
            name: "KNUST".to_string(),
            active: true,
        },
    )
    .await
    .unwrap();
    let outsider = world.add_user("Esi Src", Role::Src, Some(other.id)).await;

    let err = service::src_review(&world.pool, &outsider, id, &World::approve())
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Forbidden(_)));
    assert_eq!(world.view_as_admin(id).await.status, S::PendingSrc);
}

#[tokio::test]
async fn test_admin_cannot_skip_src_review() {
    let world = World::new().await;
    let id = world.application().await;
    let err = service::admin_review(&world.pool, &world.admin, id, &World::approve())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Workflow(WorkflowError::InvalidTransition { .. })
    ));
    assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_student_cannot_review_own_application() {
    let world = World::new().await;
    let id = world.application().await;
    let err = service::src_review(&world.pool, &world.student, id, &World::approve())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Workflow(WorkflowError::NotAuthorized { .. })
    ));
    assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rejection_needs_reason_and_is_terminal() {
    let world = World::new().await;
    let id = world.application().await;

    let err = service::src_review(
        &world.pool,
        &world.src,
        id,
        &ReviewRequest {
            decision: Decision::Reject,
            reason: Some("   ".to_string()),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));

    let view = service::src_review(&world.pool, &world.src, id, &reject("incomplete ID"))
        .await
        .unwrap();
    assert_eq!(view.status, S::SrcRejected);
    assert_eq!(view.review_note.as_deref(), Some("incomplete ID"));

    let err = service::admin_review(&world.pool, &world.admin, id, &World::approve())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Workflow(WorkflowError::Terminal(S::SrcRejected))
    ));

    let trail = world.trail(id).await;
    assert_eq!(trail[0].action, AuditAction::SrcRejected);
    assert_eq!(trail[0].details["reason"], "incomplete ID");
}

#[tokio::test]
async fn test_admin_approval_rolls_back_when_out_of_stock() {
    let world = World::new().await;
    let id = world.application().await;
    service::src_review(&world.pool, &world.src, id, &World::approve())
        .await
        .unwrap();
    service::update_laptop(
        &world.pool,
        &world.admin,
        world.laptop.id,
        &LaptopPatch {
            stock: Some(0),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = service::admin_review(&world.pool, &world.admin, id, &World::approve())
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    assert_eq!(world.view_as_admin(id).await.status, S::SrcApproved);
    let trail = world.trail(id).await;
    assert!(trail.iter().all(|e| e.action != AuditAction::AdminApproved));
}

#[tokio::test]
async fn test_withdraw_only_before_admin_approval() {
    let world = World::new().await;
    let id = world.admin_approved_application().await;
    let err = service::withdraw(&world.pool, &world.student, id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::Workflow(WorkflowError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_delivery_must_be_assigned_staff() {
    let world = World::new().await;
    let user = world.add_user("Efua Student", Role::Student, Some(world.university_id)).await;
    let id = world.admin_approved_application().await;

    let err = service::assign_delivery(
        &world.pool,
        &world.admin,
        id,
        &crate::models::AssignDeliveryRequest {
            delivery_user_id: user.id,
            address: "Legon Hall".to_string(),
            scheduled_for: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));
    assert_eq!(world.view_as_admin(id).await.status, S::AdminApproved);
}

#[tokio::test]
async fn test_confirm_delivery_checks_courier_and_amount() {
    let world = World::new().await;
    let id = world.assigned_application().await;
    let other = world.add_user("Kwame Courier", Role::Delivery, None).await;

    let request = ConfirmDeliveryRequest {
        amount_collected: 350_000,
        notes: None,
    };
    let err = service::confirm_delivery(&world.pool, &other, id, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Forbidden(_)));

    let err = service::confirm_delivery(
        &world.pool,
        &world.courier,
        id,
        &ConfirmDeliveryRequest {
            amount_collected: 300_000,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));

    let view = service::confirm_delivery(&world.pool, &world.courier, id, &request)
        .await
        .unwrap();
    assert_eq!(view.status, S::Delivered);
    let initial = view
        .payments
        .iter()
        .find(|p| p.payment_type == PaymentType::Initial70)
        .unwrap();
    assert_eq!(initial.collected_by, Some(world.courier.id));
    assert!(initial.settled_at.is_some());

    // A second confirmation cannot collect again.
    let err = service::confirm_delivery(&world.pool, &world.courier, id, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Workflow(_)));
}

#[tokio::test]
async fn test_confirming_twice_reports_the_transition_not_the_amount() {
    let world = World::new().await;
    let id = world.delivered_application().await;

    let err = service::confirm_delivery(
        &world.pool,
        &world.courier,
        id,
        &ConfirmDeliveryRequest {
            amount_collected: 1,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, ServerError::Workflow(WorkflowError::InvalidTransition { .. })),
        "{err:?}"
    );
    assert_eq!(err.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_final_payment_waits_for_delivery() {
    let world = World::new().await;
    let gateway = FakeGateway::default();
    let id = world.assigned_application().await;

    let err = service::initiate_final_payment(&world.pool, &gateway, None, &world.student, id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));
    assert!(gateway.checkouts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_payment_can_be_retried() {
    let world = World::new().await;
    let gateway = FakeGateway::default();
    let id = world.delivered_application().await;

    let first = world.initiate_final(&gateway, id).await;
    gateway.set_outcome(
        &first.reference,
        GatewayOutcome::Failed {
            reason: "Declined".to_string(),
        },
    );
    let view = service::verify_final_payment(&world.pool, &gateway, &world.student, id)
        .await
        .unwrap();
    assert_eq!(view.status, S::Delivered);
    assert_eq!(payment(&view, PaymentType::Final30).0, PaymentStatus::Failed);

    // Verifying again has nothing to verify.
    let err = service::verify_final_payment(&world.pool, &gateway, &world.student, id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = world.initiate_final(&gateway, id).await;
    assert_ne!(second.reference, first.reference);
    gateway.set_outcome(&second.reference, GatewayOutcome::Success { amount: 150_000 });

    let view = service::verify_final_payment(&world.pool, &gateway, &world.admin, id)
        .await
        .unwrap();
    assert_eq!(view.status, S::Completed);

    let failed = audit::query(
        &world.pool,
        &AuditFilter {
            action: Some(AuditAction::FinalPaymentFailed),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].details["reason"], "Declined");
}

#[tokio::test]
async fn test_underpayment_is_recorded_as_failure() {
    let world = World::new().await;
    let gateway = FakeGateway::default();
    let id = world.delivered_application().await;
    let checkout = world.initiate_final(&gateway, id).await;

    gateway.set_outcome(&checkout.reference, GatewayOutcome::Success { amount: 100 });
    let view = service::verify_final_payment(&world.pool, &gateway, &world.student, id)
        .await
        .unwrap();
    assert_eq!(view.status, S::Delivered);
    assert_eq!(payment(&view, PaymentType::Final30).0, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_reinitiating_settles_a_paid_checkout_first() {
    let world = World::new().await;
    let gateway = FakeGateway::default();
    let id = world.delivered_application().await;
    let checkout = world.initiate_final(&gateway, id).await;
    gateway.set_outcome(&checkout.reference, GatewayOutcome::Success { amount: 150_000 });

    let err = service::initiate_final_payment(&world.pool, &gateway, None, &world.student, id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));
    assert_eq!(world.view_as_admin(id).await.status, S::Completed);
    assert_eq!(gateway.checkouts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_listing_is_scoped_by_role() {
    let world = World::new().await;
    let id = world.assigned_application().await;
    let classmate = world.add_user("Abena Student", Role::Student, Some(world.university_id)).await;

    let own = service::list_applications(&world.pool, &world.student, None)
        .await
        .unwrap();
    assert_eq!(own.len(), 1);
    assert!(service::list_applications(&world.pool, &classmate, None)
        .await
        .unwrap()
        .is_empty());

    let err = service::get_application(&world.pool, &classmate, id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Forbidden(_)));

    assert_eq!(
        service::list_applications(&world.pool, &world.src, None)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        service::list_applications(&world.pool, &world.courier, None)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(
        service::list_applications(&world.pool, &world.admin, Some(S::PendingSrc))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        service::list_applications(&world.pool, &world.admin, Some(S::DeliveryAssigned))
            .await
            .unwrap()[0]
            .id,
        id
    );
}

#[tokio::test]
async fn test_audit_log_rejects_edits() {
    let world = World::new().await;
    world.application().await;

    let update = sqlx::query("UPDATE audit_log SET actor_id = 'someone-else'")
        .execute(&world.pool)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM audit_log").execute(&world.pool).await;
    assert!(delete.is_err());
}

#[tokio::test]
async fn test_global_audit_log_is_admin_only_and_filterable() {
    let world = World::new().await;
    world.admin_approved_application().await;

    let err = service::audit_log(&world.pool, &world.src, &AuditFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Forbidden(_)));

    let src_actions = service::audit_log(
        &world.pool,
        &world.admin,
        &AuditFilter {
            actor_role: Some(Role::Src),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(src_actions.len(), 1);
    assert_eq!(src_actions[0].action, AuditAction::SrcApproved);
    assert_eq!(src_actions[0].actor_id, world.src.id.to_string());

    let by_system = service::audit_log(
        &world.pool,
        &world.admin,
        &AuditFilter {
            actor_id: Some("system".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_system.len(), 1);
    assert_eq!(by_system[0].action, AuditAction::UserCreated);

    let paged = service::audit_log(
        &world.pool,
        &world.admin,
        &AuditFilter {
            limit: Some(2),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(paged.len(), 2);
    assert!(paged[0].id > paged[1].id);
}

#[tokio::test]
async fn test_users_get_valid_roles_and_unique_emails() {
    let world = World::new().await;
    let mut request = crate::models::NewUser {
        full_name: "Robot".to_string(),
        email: "robot@example.edu".to_string(),
        phone: None,
        role: Role::System,
        university_id: None,
        student_number: None,
    };
    let err = service::create_user(&world.pool, &world.admin, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));

    request.role = Role::Student;
    let err = service::create_user(&world.pool, &world.admin, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Validation(_)));

    request.role = Role::Delivery;
    request.email = world.courier.email.to_uppercase();
    let err = service::create_user(&world.pool, &world.admin, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)));

    assert!(service::bootstrap_admin(&world.pool, "second@example.edu")
        .await
        .unwrap()
        .is_none());
}

/// Simulates a second checkout landing while this one talks to the gateway.
struct RacingGateway {
    pool: SqlitePool,
    inner: FakeGateway,
}

#[async_trait]
impl PaymentGateway for RacingGateway {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout> {
        sqlx::query(
            "UPDATE payments SET reference = 'LAP-RIVAL-F30' WHERE payment_type = 'FINAL_30'",
        )
        .execute(&self.pool)
        .await?;
        self.inner.initialize(request).await
    }

    async fn verify(&self, reference: &str) -> Result<GatewayOutcome> {
        self.inner.verify(reference).await
    }
}

#[tokio::test]
async fn test_concurrent_checkout_keeps_the_first_reference() {
    let world = World::new().await;
    let id = world.delivered_application().await;
    let gateway = RacingGateway {
        pool: world.pool.clone(),
        inner: FakeGateway::default(),
    };

    let err = service::initiate_final_payment(&world.pool, &gateway, None, &world.student, id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Stale(_)), "{err:?}");
    assert_eq!(err.status(), StatusCode::CONFLICT);

    let stored = db::get_payment(&world.pool, id, PaymentType::Final30)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.reference.as_deref(), Some("LAP-RIVAL-F30"));
    assert_eq!(stored.status().unwrap(), PaymentStatus::Pending);
}

#[tokio::test]
async fn test_duplicate_university_name_is_conflict() {
    let world = World::new().await;
    let request = NewUniversity {
        name: "university of ghana".to_string(),
        active: true,
    };
    let err = service::create_university(&world.pool, &world.admin, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Conflict(_)), "{err:?}");
    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert_eq!(service::list_universities(&world.pool).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_simultaneous_admin_reviews_let_exactly_one_win() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("lapfin.db").display());
    let pool = db::init_pool_with(&url, 5).await.unwrap();
    let world = World::on(pool).await;
    let second_admin = world.add_user("Esi Admin", Role::Admin, None).await;
    service::update_laptop(
        &world.pool,
        &world.admin,
        world.laptop.id,
        &LaptopPatch {
            stock: Some(10),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    for round in 0..4 {
        let student = world
            .add_user(&format!("Student {round}"), Role::Student, Some(world.university_id))
            .await;
        let id = world.src_approved_application_for(&student).await;

        let approve = World::approve();
        let (a, b) = tokio::join!(
            service::admin_review(&world.pool, &world.admin, id, &approve),
            service::admin_review(&world.pool, &second_admin, id, &approve),
        );
        let (won, lost) = match (a, b) {
            (Ok(view), Err(err)) | (Err(err), Ok(view)) => (view, err),
            other => panic!("round {round}: expected one winner, got {other:?}"),
        };
        assert_eq!(won.status, S::AdminApproved);
        assert_eq!(lost.status(), StatusCode::CONFLICT, "round {round}: {lost:?}");
    }

    // One unit reserved per approved application.
    let laptop = service::get_laptop(&world.pool, &world.admin, world.laptop.id)
        .await
        .unwrap();
    assert_eq!(laptop.stock, 6);
}
