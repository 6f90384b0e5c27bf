//! Shared fixtures for the server's tests: an in-memory database seeded with
//! one university, one account per role and a laptop, plus a scripted gateway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use lapfin_workflow::{Decision, Role};
use sqlx::SqlitePool;

use crate::audit::AuditFilter;
use crate::db;
use crate::errors::{Result, ServerError};
use crate::gateway::{Checkout, CheckoutRequest, GatewayOutcome, PaymentGateway};
use crate::models::{
    Actor, ApplicationView, AssignDeliveryRequest, AuditEntry, ConfirmDeliveryRequest,
    FinalPaymentCheckout, IdentityDocument, Laptop, NewApplication, NewLaptop, NewUniversity,
    NewUser, ReviewRequest,
};
use crate::service;

pub const LAPTOP_PRICE: i64 = 500_000;

/// Gateway double: every checkout succeeds, verification answers whatever
/// outcome was scripted for the reference (default: still pending).
#[derive(Default)]
pub struct FakeGateway {
    outcomes: Mutex<HashMap<String, GatewayOutcome>>,
    pub checkouts: Mutex<Vec<CheckoutRequest>>,
    fail_verify: AtomicBool,
}

impl FakeGateway {
    pub fn set_outcome(&self, reference: &str, outcome: GatewayOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(reference.to_string(), outcome);
    }

    pub fn fail_verify(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize(&self, request: &CheckoutRequest) -> Result<Checkout> {
        self.checkouts.lock().unwrap().push(request.clone());
        Ok(Checkout {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            reference: request.reference.clone(),
        })
    }

    async fn verify(&self, reference: &str) -> Result<GatewayOutcome> {
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(ServerError::Gateway("gateway unreachable".to_string()));
        }
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or(GatewayOutcome::Pending))
    }
}

pub async fn memory_pool() -> SqlitePool {
    db::init_pool_with("sqlite::memory:", 1).await.unwrap()
}

pub struct World {
    pub pool: SqlitePool,
    pub university_id: i64,
    pub admin: Actor,
    pub src: Actor,
    pub student: Actor,
    pub courier: Actor,
    pub laptop: Laptop,
}

async fn make_user(
    pool: &SqlitePool,
    admin: &Actor,
    name: &str,
    role: Role,
    university_id: Option<i64>,
) -> Actor {
    let user = service::create_user(
        pool,
        admin,
        &NewUser {
            full_name: name.to_string(),
            email: format!("{}@example.edu", name.to_lowercase().replace(' ', ".")),
            phone: Some("+233200000000".to_string()),
            role,
            university_id,
            student_number: (role == Role::Student).then(|| "UG-10001".to_string()),
        },
    )
    .await
    .unwrap();
    Actor::try_from(user).unwrap()
}

impl World {
    pub async fn new() -> Self {
        Self::on(memory_pool().await).await
    }

    /// Seed a fresh database behind `pool`.
    pub async fn on(pool: SqlitePool) -> Self {
        let admin = service::bootstrap_admin(&pool, "admin@example.edu")
            .await
            .unwrap()
            .unwrap();
        let admin = Actor::try_from(admin).unwrap();

        let university = service::create_university(
            &pool,
            &admin,
            &NewUniversity {
                name: "University of Ghana".to_string(),
                active: true,
            },
        )
        .await
        .unwrap();

        let src = make_user(&pool, &admin, "Kofi Src", Role::Src, Some(university.id)).await;
        let student =
            make_user(&pool, &admin, "Ama Student", Role::Student, Some(university.id)).await;
        let courier = make_user(&pool, &admin, "Yaw Courier", Role::Delivery, None).await;

        let laptop = service::create_laptop(
            &pool,
            &admin,
            &NewLaptop {
                brand: "Dell".to_string(),
                model: "Latitude 5440".to_string(),
                specs: "i5, 16GB, 512GB SSD".to_string(),
                price: LAPTOP_PRICE,
                stock: 3,
                active: true,
            },
        )
        .await
        .unwrap();

        World {
            pool,
            university_id: university.id,
            admin,
            src,
            student,
            courier,
            laptop,
        }
    }

    pub async fn add_user(&self, name: &str, role: Role, university_id: Option<i64>) -> Actor {
        make_user(&self.pool, &self.admin, name, role, university_id).await
    }

    pub fn documents() -> Vec<IdentityDocument> {
        vec![IdentityDocument {
            kind: "STUDENT_ID".to_string(),
            url: "https://files.example.edu/ids/ug-10001.png".to_string(),
        }]
    }

    pub async fn apply_as(&self, student: &Actor) -> Result<ApplicationView> {
        service::create_application(
            &self.pool,
            student,
            &NewApplication {
                laptop_id: self.laptop.id,
                documents: Self::documents(),
            },
        )
        .await
    }

    pub async fn application(&self) -> i64 {
        self.apply_as(&self.student).await.unwrap().id
    }

    pub fn approve() -> ReviewRequest {
        ReviewRequest {
            decision: Decision::Approve,
            reason: None,
        }
    }

    pub async fn admin_approved_application(&self) -> i64 {
        self.admin_approved_application_for(&self.student).await
    }

    pub async fn src_approved_application_for(&self, student: &Actor) -> i64 {
        let id = self.apply_as(student).await.unwrap().id;
        service::src_review(&self.pool, &self.src, id, &Self::approve())
            .await
            .unwrap();
        id
    }

    pub async fn admin_approved_application_for(&self, student: &Actor) -> i64 {
        let id = self.apply_as(student).await.unwrap().id;
        service::src_review(&self.pool, &self.src, id, &Self::approve())
            .await
            .unwrap();
        service::admin_review(&self.pool, &self.admin, id, &Self::approve())
            .await
            .unwrap();
        id
    }

    pub async fn assigned_application(&self) -> i64 {
        self.assigned_application_for(&self.student).await
    }

    pub async fn assigned_application_for(&self, student: &Actor) -> i64 {
        let id = self.admin_approved_application_for(student).await;
        service::assign_delivery(
            &self.pool,
            &self.admin,
            id,
            &AssignDeliveryRequest {
                delivery_user_id: self.courier.id,
                address: "Volta Hall, Room 12".to_string(),
                scheduled_for: None,
            },
        )
        .await
        .unwrap();
        id
    }

    pub async fn delivered_application(&self) -> i64 {
        self.delivered_application_for(&self.student).await
    }

    pub async fn delivered_application_for(&self, student: &Actor) -> i64 {
        let id = self.assigned_application_for(student).await;
        let view = service::get_application(&self.pool, &self.admin, id)
            .await
            .unwrap();
        service::confirm_delivery(
            &self.pool,
            &self.courier,
            id,
            &ConfirmDeliveryRequest {
                amount_collected: view.pricing.initial_amount,
                notes: Some("handed over at the hall".to_string()),
            },
        )
        .await
        .unwrap();
        id
    }

    pub async fn initiate_final(&self, gateway: &FakeGateway, id: i64) -> FinalPaymentCheckout {
        self.initiate_final_as(gateway, &self.student, id).await
    }

    pub async fn initiate_final_as(
        &self,
        gateway: &dyn PaymentGateway,
        student: &Actor,
        id: i64,
    ) -> FinalPaymentCheckout {
        service::initiate_final_payment(
            &self.pool,
            gateway,
            Some("https://app.example.edu/payments/done"),
            student,
            id,
        )
        .await
        .unwrap()
    }

    pub async fn view_as_admin(&self, id: i64) -> ApplicationView {
        service::get_application(&self.pool, &self.admin, id)
            .await
            .unwrap()
    }

    pub async fn trail(&self, id: i64) -> Vec<AuditEntry> {
        crate::audit::query(&self.pool, &AuditFilter::for_application(id))
            .await
            .unwrap()
    }
}
