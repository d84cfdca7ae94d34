//! Mother bot conversations end to end: registration, payment review,
//! renewal, product entry, order handling and bot linking.
//!
//! Run with: cargo test --test mother_flow_test

mod common;

use common::{named_text, seed_product, seed_store, Hub, ADMIN, CUSTOMER, OWNER, TOKEN_A};
use storehub::core::plan::PlanType;
use storehub::core::types::InboundEvent;
use storehub::router::SessionChange;
use storehub::session::FlowStep;
use storehub::storage::{NewOrder, OrderStatus, PaymentStatus};
use storehub::supervisor::TenantStatus;
use storehub::telegram::messages;
use storehub::testing::Sent;

const FIFTY_CHARS: &str = "Handmade ceramics, mugs and bowls, fired in Leeds.";

fn text(user: i64, body: &str) -> InboundEvent {
    named_text(user, "alice", body)
}

fn tap(user: i64, action: &str) -> InboundEvent {
    InboundEvent::callback(user, user, format!("cb-{}", action), action)
}

/// Walks a user up to the plan question.
async fn register_until_plan(hub: &Hub, user: i64) {
    hub.send(text(user, "/register")).await;
    hub.send(text(user, "My Shop")).await;
    hub.send(text(user, FIFTY_CHARS)).await;
    assert!(matches!(
        hub.session(user).await,
        Some(FlowStep::RegistrationAwaitingPlan { .. })
    ));
}

// ==================== registration ====================

mod registration {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_free_registration_walkthrough() {
        let hub = Hub::new();
        assert_eq!(FIFTY_CHARS.chars().count(), 50);

        let routed = hub.send(text(OWNER, "register")).await;
        assert_eq!(routed.session, SessionChange::Set(FlowStep::RegistrationAwaitingName));

        let routed = hub.send(text(OWNER, "ab")).await;
        assert_eq!(routed.session, SessionChange::Unchanged);
        assert_eq!(hub.session(OWNER).await, Some(FlowStep::RegistrationAwaitingName));

        let routed = hub.send(text(OWNER, "My Shop")).await;
        let awaiting_description = FlowStep::RegistrationAwaitingDescription {
            name: "My Shop".to_string(),
        };
        assert_eq!(routed.session, SessionChange::Set(awaiting_description.clone()));

        let routed = hub.send(text(OWNER, &"d".repeat(500))).await;
        assert_eq!(routed.session, SessionChange::Unchanged);
        assert!(routed.effects[0].text().contains("at most 200 characters"));
        assert_eq!(hub.session(OWNER).await, Some(awaiting_description));

        let routed = hub.send(text(OWNER, FIFTY_CHARS)).await;
        assert_eq!(
            routed.session,
            SessionChange::Set(FlowStep::RegistrationAwaitingPlan {
                name: "My Shop".to_string(),
                description: FIFTY_CHARS.to_string(),
            })
        );

        let routed = hub.send(tap(OWNER, "plan_free")).await;
        assert_eq!(routed.session, SessionChange::Cleared);
        assert_eq!(hub.session(OWNER).await, None);

        let store = hub.db.store_by_owner(OWNER).unwrap().unwrap();
        assert_eq!(store.name, "My Shop");
        assert_eq!(store.description, FIFTY_CHARS);
        assert_eq!(store.plan, PlanType::Free);
        assert_eq!(store.product_limit, Some(10));
        assert_eq!(store.commission_percent, 5);
        assert!(store.is_active);
        assert!(store.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_plan_can_be_typed() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;

        let routed = hub.send(text(OWNER, "gold")).await;
        assert_eq!(routed.session, SessionChange::Unchanged);

        hub.send(text(OWNER, "FREE")).await;
        assert_eq!(hub.db.store_by_owner(OWNER).unwrap().unwrap().plan, PlanType::Free);
    }

    #[tokio::test]
    async fn test_duplicate_final_answer_creates_one_store() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;

        hub.send(tap(OWNER, "plan_free")).await;
        let again = hub.send(tap(OWNER, "plan_free")).await;

        assert_eq!(again.effects[0].text(), messages::SELECTION_EXPIRED);
        assert_eq!(hub.db.list_stores().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_registration_is_refused() {
        let hub = Hub::new();
        seed_store(&hub.db, OWNER, PlanType::Free, true, None);

        let routed = hub.send(text(OWNER, "/register")).await;

        assert_eq!(routed.session, SessionChange::Cleared);
        assert!(routed.effects[0].text().contains("already have a store"));
    }

    #[tokio::test]
    async fn test_other_command_mid_flow_is_not_an_answer() {
        let hub = Hub::new();
        hub.send(text(OWNER, "/register")).await;

        let routed = hub.send(text(OWNER, "/plans")).await;

        assert_eq!(routed.session, SessionChange::Unchanged);
        assert_eq!(routed.effects[0].text(), messages::COMMAND_IN_FLOW);
        assert_eq!(hub.session(OWNER).await, Some(FlowStep::RegistrationAwaitingName));

        // The step still takes a real answer afterwards
        hub.send(text(OWNER, "My Shop")).await;
        assert!(matches!(
            hub.session(OWNER).await,
            Some(FlowStep::RegistrationAwaitingDescription { .. })
        ));
    }

    #[tokio::test]
    async fn test_photo_where_text_expected() {
        let hub = Hub::new();
        hub.send(text(OWNER, "/register")).await;

        let routed = hub.send(InboundEvent::photo(OWNER, OWNER, "photo-1")).await;

        assert_eq!(routed.session, SessionChange::Unchanged);
        assert_eq!(routed.effects[0].text(), "Please send a text message");
    }
}

// ==================== payments ====================

mod payments {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_paid_registration_waits_for_receipt() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;

        hub.send(tap(OWNER, "plan_pro")).await;

        let store = hub.db.store_by_owner(OWNER).unwrap().unwrap();
        assert!(!store.is_active);
        assert_eq!(
            hub.session(OWNER).await,
            Some(FlowStep::PaymentAwaitingProof {
                store_id: store.id,
                plan: PlanType::Pro,
            })
        );
        assert!(hub.last_mother_text(OWNER).await.contains("50,000"));
    }

    #[tokio::test]
    async fn test_receipt_reaches_admins_once() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;
        hub.send(tap(OWNER, "plan_pro")).await;

        let routed = hub.send(text(OWNER, "I paid")).await;
        assert_eq!(routed.session, SessionChange::Unchanged);
        assert_eq!(routed.effects[0].text(), "Please send a photo");

        let routed = hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-1")).await;
        assert_eq!(routed.session, SessionChange::Cleared);

        let to_admin: Vec<_> = hub
            .mother_out
            .sent()
            .await
            .into_iter()
            .filter(|s| s.chat_id() == Some(ADMIN))
            .collect();
        assert_eq!(to_admin.len(), 1);
        let Sent::Photo { photo, keyboard, .. } = &to_admin[0] else {
            panic!("admin should get the receipt photo");
        };
        assert_eq!(photo, "receipt-1");
        let payment = hub.db.pending_payments().unwrap().pop().unwrap();
        let actions = keyboard.as_ref().unwrap().actions().join(",");
        assert_eq!(
            actions,
            format!("approve_payment_{},reject_payment_{}", payment.id, payment.id)
        );

        // Resending the same receipt after the flow ended does not duplicate it
        hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-1")).await;
        assert_eq!(hub.db.pending_payments().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_activates_store() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;
        hub.send(tap(OWNER, "plan_vip")).await;
        hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-2")).await;
        let payment = hub.db.pending_payments().unwrap().pop().unwrap();

        let approve = format!("approve_payment_{}", payment.id);
        hub.send(tap(ADMIN, &approve)).await;

        let store = hub.db.store_by_owner(OWNER).unwrap().unwrap();
        assert!(store.is_active);
        assert_eq!(store.plan, PlanType::Vip);
        assert_eq!(store.product_limit, None);
        assert_eq!(
            hub.db.payment(payment.id).unwrap().unwrap().status,
            PaymentStatus::Confirmed
        );
        let owner_texts = hub.mother_texts(OWNER).await;
        assert!(owner_texts.iter().any(|t| t.contains("approved")));
        assert!(owner_texts.iter().any(|t| t.contains("/token")));

        let again = hub.send(tap(ADMIN, &approve)).await;
        assert_eq!(again.effects[0].text(), messages::PAYMENT_ALREADY_DECIDED);
    }

    #[tokio::test]
    async fn test_approval_starts_linked_bot() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Pro, false, Some(TOKEN_A));
        let (payment, _) = hub
            .db
            .create_payment(&storehub::storage::NewPayment {
                store_id: store.id,
                user_id: OWNER,
                plan: PlanType::Pro,
                amount: 50_000,
                proof_file_id: "receipt-3",
            })
            .unwrap();

        hub.send(tap(ADMIN, &format!("approve_payment_{}", payment.id))).await;

        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Running);
        hub.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_only_admins_decide() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;
        hub.send(tap(OWNER, "plan_pro")).await;
        hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-4")).await;
        let payment = hub.db.pending_payments().unwrap().pop().unwrap();

        let routed = hub.send(tap(OWNER, &format!("approve_payment_{}", payment.id))).await;

        assert_eq!(routed.effects[0].text(), messages::NOT_ADMIN);
        assert_eq!(hub.db.pending_payments().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_notifies_owner() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;
        hub.send(tap(OWNER, "plan_pro")).await;
        hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-5")).await;
        let payment = hub.db.pending_payments().unwrap().pop().unwrap();

        hub.send(tap(ADMIN, &format!("reject_payment_{}", payment.id))).await;

        assert!(!hub.db.store_by_owner(OWNER).unwrap().unwrap().is_active);
        assert!(hub.last_mother_text(OWNER).await.contains("could not be confirmed"));
        let rejection = hub.mother_out.sent().await.pop().unwrap();
        let Sent::Message { keyboard, .. } = rejection else {
            panic!("rejection should be a text message");
        };
        assert_eq!(keyboard.unwrap().actions(), vec![messages::RENEW_ACTION]);
    }

    #[tokio::test]
    async fn test_cancelled_payment_can_be_resumed_by_renewing() {
        let hub = Hub::new();
        register_until_plan(&hub, OWNER).await;
        hub.send(tap(OWNER, "plan_pro")).await;
        hub.send(text(OWNER, "/cancel")).await;
        assert_eq!(hub.session(OWNER).await, None);
        let store = hub.db.store_by_owner(OWNER).unwrap().unwrap();

        let routed = hub.send(tap(OWNER, messages::RENEW_ACTION)).await;
        let actions = routed.effects[0].keyboard().unwrap().actions();
        assert!(actions.contains(&"upgrade_pro"));
        assert!(actions.contains(&"upgrade_vip"));

        hub.send(tap(OWNER, "upgrade_vip")).await;
        assert_eq!(
            hub.session(OWNER).await,
            Some(FlowStep::PaymentAwaitingProof {
                store_id: store.id,
                plan: PlanType::Vip,
            })
        );

        let routed = hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-6")).await;
        assert_eq!(routed.effects[0].text(), messages::PAYMENT_SUBMITTED);
        let payment = hub.db.pending_payments().unwrap().pop().unwrap();
        assert_eq!(payment.store_id, store.id);
        assert_eq!(payment.plan, PlanType::Vip);
    }

    #[tokio::test]
    async fn test_renewal_extends_an_active_plan() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Pro, true, None);
        let before = store.expires_at.unwrap();

        hub.send(text(OWNER, "/renew")).await;
        hub.send(tap(OWNER, "upgrade_pro")).await;
        hub.send(InboundEvent::photo(OWNER, OWNER, "receipt-7")).await;
        let payment = hub.db.pending_payments().unwrap().pop().unwrap();
        hub.send(tap(ADMIN, &format!("approve_payment_{}", payment.id))).await;

        let renewed = hub.db.store(store.id).unwrap().unwrap();
        assert!(renewed.is_active);
        assert!(renewed.expires_at.unwrap() > before);
    }

    #[tokio::test]
    async fn test_free_plan_is_not_a_renewal_option() {
        let hub = Hub::new();
        seed_store(&hub.db, OWNER, PlanType::Pro, false, None);

        let routed = hub.send(tap(OWNER, "upgrade_free")).await;

        assert_eq!(routed.session, SessionChange::Cleared);
        assert_eq!(hub.session(OWNER).await, None);
        assert!(routed.effects[0].text().contains("Renew or upgrade"));
    }
}

// ==================== products ====================

mod products {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_add_product_without_image() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, None);

        hub.send(text(OWNER, "/addproduct")).await;
        hub.send(text(OWNER, "Blue mug")).await;
        hub.send(text(OWNER, "Glazed stoneware, 350ml")).await;
        let routed = hub.send(text(OWNER, "twenty")).await;
        assert_eq!(routed.session, SessionChange::Unchanged);
        hub.send(text(OWNER, "25,000")).await;
        let routed = hub.send(tap(OWNER, storehub::flow::SKIP_IMAGE_ACTION)).await;

        assert_eq!(routed.session, SessionChange::Cleared);
        let products = hub.db.products_for_store(store.id).unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Blue mug");
        assert_eq!(products[0].price, 25_000);
        assert_eq!(products[0].image_file_id, None);
    }

    #[tokio::test]
    async fn test_add_product_with_image() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, None);

        hub.send(text(OWNER, "/addproduct")).await;
        hub.send(text(OWNER, "Teapot")).await;
        hub.send(text(OWNER, "Holds four cups")).await;
        hub.send(text(OWNER, "90000")).await;
        hub.send(InboundEvent::photo(OWNER, OWNER, "teapot-photo")).await;

        let products = hub.db.products_for_store(store.id).unwrap();
        assert_eq!(products[0].image_file_id.as_deref(), Some("teapot-photo"));
    }

    #[tokio::test]
    async fn test_product_limit_blocks_new_products() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, None);
        for i in 0..10 {
            seed_product(&hub.db, store.id, &format!("Item {}", i), 1_000);
        }

        let routed = hub.send(text(OWNER, "/addproduct")).await;

        assert_eq!(routed.session, SessionChange::Cleared);
        assert!(routed.effects[0].text().contains("limit is reached"));
    }

    #[tokio::test]
    async fn test_inactive_store_cannot_add_products() {
        let hub = Hub::new();
        seed_store(&hub.db, OWNER, PlanType::Pro, false, None);

        let routed = hub.send(text(OWNER, "/addproduct")).await;

        assert_eq!(routed.effects[0].text(), messages::STORE_INACTIVE);
    }
}

// ==================== orders ====================

mod orders {
    use super::*;
    use pretty_assertions::assert_eq;

    fn place_order(hub: &Hub, store_id: i64, product_id: i64) -> i64 {
        hub.db
            .create_order(&NewOrder {
                store_id,
                product_id,
                customer_id: CUSTOMER,
                customer_name: "Bob",
                amount: 12_000,
                commission: 600,
                phone: "09120000000",
                address: "1 Main Street",
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_owner_confirms_order_and_customer_hears() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, Some(TOKEN_A));
        let product = seed_product(&hub.db, store.id, "Mug", 12_000);
        hub.supervisor.start(store.id).await.unwrap();
        let order_id = place_order(&hub, store.id, product.id);

        let routed = hub.send(tap(OWNER, "view_orders")).await;
        assert!(routed.effects[0].text().contains(&format!("#{}", order_id)));
        let confirm = format!("confirm_order_{}", order_id);
        assert!(routed.effects[0].keyboard().unwrap().actions().contains(&confirm.as_str()));

        let routed = hub.send(tap(OWNER, &confirm)).await;
        assert!(routed.effects[0].text().contains("customer was notified"));
        let orders = hub.db.orders_for_store(store.id, 10).unwrap();
        assert_eq!(orders[0].status, OrderStatus::Confirmed);
        assert!(hub
            .tenant_out
            .texts_to(CUSTOMER)
            .await
            .iter()
            .any(|t| t.contains(&format!("confirmed your order #{}", order_id))));

        let again = hub.send(tap(OWNER, &confirm)).await;
        assert_eq!(again.effects[0].text(), messages::ORDER_NOT_PENDING);

        hub.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_confirm_without_running_bot_tells_owner() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, Some(TOKEN_A));
        let product = seed_product(&hub.db, store.id, "Mug", 12_000);
        let order_id = place_order(&hub, store.id, product.id);

        let routed = hub.send(tap(OWNER, &format!("confirm_order_{}", order_id))).await;

        assert!(routed.effects[0].text().contains("not notified"));
        assert!(hub.tenant_out.texts_to(CUSTOMER).await.is_empty());
    }

    #[tokio::test]
    async fn test_cannot_confirm_another_stores_order() {
        let hub = Hub::new();
        let other = seed_store(&hub.db, OWNER + 1, PlanType::Free, true, None);
        let product = seed_product(&hub.db, other.id, "Bowl", 8_000);
        let order_id = place_order(&hub, other.id, product.id);
        seed_store(&hub.db, OWNER, PlanType::Free, true, None);

        let routed = hub.send(tap(OWNER, &format!("confirm_order_{}", order_id))).await;

        assert_eq!(routed.effects[0].text(), messages::ORDER_NOT_PENDING);
        let orders = hub.db.orders_for_store(other.id, 10).unwrap();
        assert_eq!(orders[0].status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_orders_command_without_orders() {
        let hub = Hub::new();
        seed_store(&hub.db, OWNER, PlanType::Free, true, None);

        let routed = hub.send(text(OWNER, "/orders")).await;

        assert!(routed.effects[0].text().contains("no orders yet"));
    }
}

// ==================== bot link ====================

mod bot_link {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_linking_a_token_starts_the_bot() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, None);

        hub.send(text(OWNER, "/token")).await;
        let routed = hub.send(text(OWNER, "not-a-token")).await;
        assert_eq!(routed.session, SessionChange::Unchanged);

        let routed = hub.send(text(OWNER, TOKEN_A)).await;
        assert_eq!(routed.session, SessionChange::Cleared);

        let stored = hub.db.store(store.id).unwrap().unwrap();
        assert_eq!(stored.bot_token.as_deref(), Some(TOKEN_A));
        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Running);
        assert_eq!(hub.connector.live_sources(), 1);

        hub.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_token_is_reported() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, None);
        hub.connector.reject(TOKEN_A);

        hub.send(text(OWNER, "/token")).await;
        hub.send(text(OWNER, TOKEN_A)).await;

        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Error);
        assert!(hub
            .mother_texts(OWNER)
            .await
            .iter()
            .any(|t| t.contains("could not run")));
    }

    #[tokio::test]
    async fn test_owner_controls_own_bot() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, Some(TOKEN_A));

        hub.send(tap(OWNER, "bot_start")).await;
        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Running);

        hub.send(tap(OWNER, "bot_stop")).await;
        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Stopped);

        assert!(!hub.db.store(store.id).unwrap().unwrap().bot_enabled);

        let routed = hub.send(tap(OWNER, "bot_stop")).await;
        assert!(routed.effects[0].text().contains("stop failed"));

        hub.send(tap(OWNER, "bot_start")).await;
        assert!(hub.db.store(store.id).unwrap().unwrap().bot_enabled);
        hub.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_commands() {
        let hub = Hub::new();
        let store = seed_store(&hub.db, OWNER, PlanType::Free, true, Some(TOKEN_A));

        let routed = hub.send(text(OWNER, &format!("/startbot {}", store.id))).await;
        assert_eq!(routed.effects[0].text(), messages::NOT_ADMIN);

        let routed = hub.send(text(ADMIN, "/startbot")).await;
        assert_eq!(routed.effects[0].text(), messages::USAGE_TENANT_COMMAND);

        hub.send(text(ADMIN, &format!("/startbot {}", store.id))).await;
        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Running);

        let routed = hub.send(text(ADMIN, &format!("/startbot {}", store.id))).await;
        assert!(routed.effects[0].text().contains("already running"));

        hub.send(text(ADMIN, &format!("/restartbot {}", store.id))).await;
        assert_eq!(hub.connector.opens(), 2);

        hub.send(text(ADMIN, &format!("/stopbot {}", store.id))).await;
        assert_eq!(hub.supervisor.status(store.id).await, TenantStatus::Stopped);
    }
}
