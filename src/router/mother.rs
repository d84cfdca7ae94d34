//! The control bot: onboarding, store management and admin actions.

use async_trait::async_trait;
use chrono::Utc;

use crate::core::config::Config;
use crate::core::error::{AppError, AppResult};
use crate::core::plan::{within_product_limit, PlanCatalog, PlanType};
use crate::core::types::{InboundEvent, Keyboard, StoreId};
use crate::flow::Completion;
use crate::router::{ConversationHandler, Effect, Outcome};
use crate::session::{BotScope, FlowStep};
use crate::storage::{
    Database, NewPayment, NewProduct, NewStore, PaymentStatus, ProductCreation, Store, StoreCreation,
};
use crate::supervisor::{Supervisor, SupervisorError, TenantStatus};
use crate::telegram::messages::{self, PaymentDetails, Reply};

/// Operator-facing settings of the mother bot.
#[derive(Debug, Clone)]
pub struct MotherSettings {
    pub admins: Vec<i64>,
    pub payment: PaymentDetails,
}

impl MotherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            admins: config.admin_chat_ids.clone(),
            payment: PaymentDetails {
                card_number: config.payment_card_number.clone(),
                card_holder: config.payment_card_holder.clone(),
                catalog: PlanCatalog::from_config(config),
            },
        }
    }

    fn catalog(&self) -> &PlanCatalog {
        &self.payment.catalog
    }
}

/// How many orders the owner's order list shows
const RECENT_ORDERS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TenantAction {
    Start,
    Stop,
    Restart,
}

impl TenantAction {
    fn name(self) -> &'static str {
        match self {
            TenantAction::Start => "start",
            TenantAction::Stop => "stop",
            TenantAction::Restart => "restart",
        }
    }
}

pub struct MotherHandler {
    db: Database,
    supervisor: Supervisor,
    settings: MotherSettings,
}

impl MotherHandler {
    pub fn new(db: Database, supervisor: Supervisor, settings: MotherSettings) -> Self {
        Self {
            db,
            supervisor,
            settings,
        }
    }

    fn is_admin(&self, user_id: i64) -> bool {
        self.settings.admins.contains(&user_id)
    }

    fn menu_reply(&self, event: &InboundEvent, has_store: bool) -> Reply {
        let sender = event.sender();
        let name = if sender.first_name.is_empty() {
            "there"
        } else {
            sender.first_name.as_str()
        };
        messages::main_menu(name, has_store, self.is_admin(sender.user_id))
    }

    fn owned_store(&self, event: &InboundEvent) -> AppResult<Option<Store>> {
        self.db.store_by_owner(event.user_id())
    }

    fn no_store(chat_id: i64) -> Outcome {
        Outcome::reply(
            chat_id,
            Reply::text(messages::NO_STORE).with_keyboard(Keyboard::single("🆕 Register a store", "register_store")),
        )
    }

    async fn show_menu(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let has_store = self.owned_store(event)?.is_some();
        Ok(Outcome::reply(event.chat_id(), self.menu_reply(event, has_store)))
    }

    fn begin_registration(&self, event: &InboundEvent) -> AppResult<Outcome> {
        match self.owned_store(event)? {
            Some(store) => Ok(Outcome::reply(event.chat_id(), messages::already_owns_store(&store))),
            None => Ok(Outcome::enter(FlowStep::RegistrationAwaitingName)),
        }
    }

    fn show_plans(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let has_store = self.owned_store(event)?.is_some();
        Ok(Outcome::reply(
            event.chat_id(),
            messages::plans(self.settings.catalog(), has_store),
        ))
    }

    fn show_panel(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(event.chat_id()));
        };
        let count = self.db.count_products(store.id)?;
        Ok(Outcome::reply(event.chat_id(), messages::store_panel(&store, count)))
    }

    fn list_products(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(event.chat_id()));
        };
        let products = self.db.products_for_store(store.id)?;
        Ok(Outcome::reply(event.chat_id(), messages::owner_products(&products)))
    }

    fn begin_product(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(chat_id));
        };
        if !store.is_active {
            return Ok(Outcome::reply(chat_id, messages::store_inactive()));
        }
        if let Some(limit) = store.product_limit {
            if !within_product_limit(Some(limit), self.db.count_products(store.id)?) {
                return Ok(Outcome::reply(chat_id, messages::product_limit_reached(limit)));
            }
        }
        Ok(Outcome::enter(FlowStep::ProductAwaitingName { store_id: store.id }))
    }

    fn begin_bot_link(&self, event: &InboundEvent) -> AppResult<Outcome> {
        match self.owned_store(event)? {
            Some(store) => Ok(Outcome::enter(FlowStep::BotLinkAwaitingToken { store_id: store.id })),
            None => Ok(Self::no_store(event.chat_id())),
        }
    }

    fn show_orders(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(event.chat_id()));
        };
        let orders = self.db.orders_for_store(store.id, RECENT_ORDERS)?;
        Ok(Outcome::reply(event.chat_id(), messages::store_orders(&orders)))
    }

    /// Owner confirming a pending order; the customer hears about it through
    /// the store bot when that bot is running.
    async fn confirm_order(&self, event: &InboundEvent, order_id: i64) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(chat_id));
        };
        let Some(order) = self.db.confirm_order(order_id, store.id)? else {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::ORDER_NOT_PENDING)));
        };
        log::info!("Store {} confirmed order {}", store.id, order.id);

        let mut notified = false;
        if let Some(outbound) = self.supervisor.outbound(store.id).await {
            let notice = messages::order_confirmed_for_customer(&order, &store);
            match outbound
                .send_message(order.customer_id, &notice.text, notice.keyboard.as_ref())
                .await
            {
                Ok(()) => notified = true,
                Err(e) => log::warn!("Could not tell customer {} about order {}: {}", order.customer_id, order.id, e),
            }
        }
        Ok(Outcome::reply(chat_id, messages::order_confirmed(&order, notified)))
    }

    fn show_renewal(&self, event: &InboundEvent) -> AppResult<Outcome> {
        match self.owned_store(event)? {
            Some(store) => Ok(Outcome::reply(
                event.chat_id(),
                messages::renew_menu(&store, self.settings.catalog()),
            )),
            None => Ok(Self::no_store(event.chat_id())),
        }
    }

    /// Paying again for the owner's existing store, on the same or another
    /// paid plan.
    fn begin_renewal(&self, event: &InboundEvent, plan: PlanType) -> AppResult<Outcome> {
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(event.chat_id()));
        };
        if !plan.is_paid() {
            return self.show_renewal(event);
        }
        log::info!("Owner of store {} is renewing on the {} plan", store.id, plan);
        Ok(Outcome::enter(FlowStep::PaymentAwaitingProof {
            store_id: store.id,
            plan,
        }))
    }

    /// Runs the lifecycle call and records the owner's intent, so the health
    /// check does not bring back a bot that was stopped on purpose.
    async fn run_tenant_action(&self, action: TenantAction, store_id: StoreId) -> Result<TenantStatus, SupervisorError> {
        let enabled = action != TenantAction::Stop;
        if let Err(e) = self.db.set_bot_enabled(store_id, enabled) {
            log::warn!("Could not record bot switch of store {}: {}", store_id, e);
        }
        match action {
            TenantAction::Start => self.supervisor.start(store_id).await,
            TenantAction::Stop => self.supervisor.stop(store_id).await.map(|()| TenantStatus::Stopped),
            TenantAction::Restart => self.supervisor.restart(store_id).await,
        }
    }

    /// Owner controlling their own store's bot from the panel.
    async fn owner_tenant_action(&self, event: &InboundEvent, action: TenantAction) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let Some(store) = self.owned_store(event)? else {
            return Ok(Self::no_store(chat_id));
        };
        if !store.has_bot() {
            return Ok(Outcome::enter(FlowStep::BotLinkAwaitingToken { store_id: store.id }));
        }
        if action != TenantAction::Stop && !store.is_active {
            return Ok(Outcome::reply(chat_id, messages::store_inactive()));
        }
        let result = self.run_tenant_action(action, store.id).await;
        Ok(Outcome::reply(
            chat_id,
            messages::tenant_action(action.name(), store.id, result.map_err(|e| e.to_string())),
        ))
    }

    async fn admin_tenant_action(&self, event: &InboundEvent, action: TenantAction, args: &str) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let Ok(store_id) = args.trim().parse::<StoreId>() else {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::USAGE_TENANT_COMMAND)));
        };
        log::info!("Admin {} requested {} of store {}", event.user_id(), action.name(), store_id);
        let result = self.run_tenant_action(action, store_id).await;
        Ok(Outcome::reply(
            chat_id,
            messages::tenant_action(action.name(), store_id, result.map_err(|e| e.to_string())),
        ))
    }

    async fn admin_panel(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let stats = self.db.hub_stats()?;
        let live = self.supervisor.snapshot().await;
        Ok(Outcome::reply(event.chat_id(), messages::admin_panel(&stats, &live)))
    }

    async fn tenant_status(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let stores = self.db.list_stores()?;
        let live = self.supervisor.snapshot().await;
        Ok(Outcome::reply(event.chat_id(), messages::tenant_status(&stores, &live)))
    }

    /// Approve or reject a submitted receipt. Only pending payments change.
    async fn decide_payment(&self, event: &InboundEvent, payment_id: i64, approve: bool) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let status = if approve {
            PaymentStatus::Confirmed
        } else {
            PaymentStatus::Rejected
        };
        let Some(payment) = self.db.decide_payment(payment_id, status, event.user_id())? else {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::PAYMENT_ALREADY_DECIDED)));
        };
        log::info!("Payment {} {} by {}", payment.id, status, event.user_id());

        let mut outcome = Outcome::reply(chat_id, messages::payment_decided(payment.id, approve));
        if !approve {
            let owner = self
                .db
                .store(payment.store_id)?
                .map_or(payment.user_id, |store| store.owner_id);
            return Ok(outcome.with_effect(Effect::reply(owner, messages::payment_rejected())));
        }

        let limits = self.settings.catalog().limits(payment.plan);
        let store = self.db.activate_store(payment.store_id, &limits, Utc::now())?;
        outcome = outcome.with_effect(Effect::reply(store.owner_id, messages::payment_approved(&store)));

        if store.has_bot() && store.bot_enabled {
            match self.supervisor.start(store.id).await {
                Ok(_) | Err(SupervisorError::AlreadyRunning(_)) => {}
                // The owner hears about credential trouble from the supervisor
                Err(e) => log::warn!("Store {} activated but its bot did not start: {}", store.id, e),
            }
        } else if !store.has_bot() {
            outcome = outcome.with_effect(Effect::reply(store.owner_id, messages::link_bot_hint()));
        }
        Ok(outcome)
    }

    async fn on_command(&self, event: &InboundEvent, name: &str, args: &str) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let admin_only = matches!(name, "admin" | "status" | "startbot" | "stopbot" | "restartbot");
        if admin_only && !self.is_admin(event.user_id()) {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::NOT_ADMIN)));
        }

        match name {
            "help" => Ok(Outcome::reply(chat_id, messages::help())),
            "register" => self.begin_registration(event),
            "plans" => self.show_plans(event),
            "renew" => self.show_renewal(event),
            "orders" => self.show_orders(event),
            "panel" => self.show_panel(event),
            "addproduct" => self.begin_product(event),
            "token" => self.begin_bot_link(event),
            "admin" => self.admin_panel(event).await,
            "status" => self.tenant_status(event).await,
            "startbot" => self.admin_tenant_action(event, TenantAction::Start, args).await,
            "stopbot" => self.admin_tenant_action(event, TenantAction::Stop, args).await,
            "restartbot" => self.admin_tenant_action(event, TenantAction::Restart, args).await,
            _ => self.show_menu(event).await,
        }
    }

    async fn on_action(&self, event: &InboundEvent, action: &str) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        match action {
            "support" => return Ok(Outcome::reply(chat_id, messages::help())),
            "register_store" => return self.begin_registration(event),
            "view_plans" => return self.show_plans(event),
            messages::RENEW_ACTION => return self.show_renewal(event),
            "view_orders" => return self.show_orders(event),
            "manage_store" => return self.show_panel(event),
            "add_product" => return self.begin_product(event),
            "list_products" => return self.list_products(event),
            "link_bot" => return self.begin_bot_link(event),
            "bot_start" => return self.owner_tenant_action(event, TenantAction::Start).await,
            "bot_stop" => return self.owner_tenant_action(event, TenantAction::Stop).await,
            "bot_restart" => return self.owner_tenant_action(event, TenantAction::Restart).await,
            _ => {}
        }

        if let Some(plan) = PlanType::from_renewal_action(action) {
            return self.begin_renewal(event, plan);
        }
        if let Some(order_id) = action
            .strip_prefix("confirm_order_")
            .and_then(|id| id.parse::<i64>().ok())
        {
            return self.confirm_order(event, order_id).await;
        }

        if PlanType::from_action(action).is_some() {
            let has_store = self.owned_store(event)?.is_some();
            return Ok(Outcome::reply(chat_id, Reply::text(messages::SELECTION_EXPIRED))
                .with_effect(Effect::reply(chat_id, self.menu_reply(event, has_store))));
        }

        let decision = action
            .strip_prefix("approve_payment_")
            .map(|id| (id, true))
            .or_else(|| action.strip_prefix("reject_payment_").map(|id| (id, false)));
        if let Some((id, approve)) = decision {
            if !self.is_admin(event.user_id()) {
                return Ok(Outcome::reply(chat_id, Reply::text(messages::NOT_ADMIN)));
            }
            if let Ok(payment_id) = id.parse::<i64>() {
                return self.decide_payment(event, payment_id, approve).await;
            }
        }

        if action == "admin_panel" && self.is_admin(event.user_id()) {
            return self.admin_panel(event).await;
        }

        // back_main, check_membership and anything stale
        self.show_menu(event).await
    }

    async fn create_store(&self, event: &InboundEvent, name: &str, description: &str, plan: PlanType) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let limits = self.settings.catalog().limits(plan);
        let created = self.db.create_store(&NewStore {
            owner_id: event.user_id(),
            name,
            description,
            limits,
            active: !plan.is_paid(),
            now: Utc::now(),
        })?;

        let store = match created {
            StoreCreation::Created(store) => store,
            StoreCreation::AlreadyOwned(store) => {
                return Ok(Outcome::reply(chat_id, messages::already_owns_store(&store)));
            }
        };
        log::info!("User {} registered store {} on the {} plan", event.user_id(), store.id, plan);

        let outcome = Outcome::reply(chat_id, messages::store_created(&store));
        if plan.is_paid() {
            Ok(outcome.then(FlowStep::PaymentAwaitingProof {
                store_id: store.id,
                plan,
            }))
        } else {
            Ok(outcome.with_effect(Effect::reply(chat_id, messages::link_bot_hint())))
        }
    }

    async fn submit_payment(
        &self,
        event: &InboundEvent,
        store_id: StoreId,
        plan: PlanType,
        proof_file_id: &str,
    ) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let store = self
            .db
            .store(store_id)?
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;
        let (payment, created) = self.db.create_payment(&NewPayment {
            store_id,
            user_id: event.user_id(),
            plan,
            amount: self.settings.catalog().limits(plan).price,
            proof_file_id,
        })?;
        if !created {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::PAYMENT_DUPLICATE)));
        }

        if self.settings.admins.is_empty() {
            log::warn!("Payment {} submitted but no admins are configured", payment.id);
        }
        let review = messages::payment_for_review(&payment, &store, &event.sender().display_name());
        let mut outcome = Outcome::reply(chat_id, Reply::text(messages::PAYMENT_SUBMITTED));
        for admin in &self.settings.admins {
            outcome = outcome.with_effect(Effect::photo(*admin, proof_file_id, review.clone()));
        }
        Ok(outcome)
    }

    async fn link_bot(&self, event: &InboundEvent, store_id: StoreId, token: &str) -> AppResult<Outcome> {
        self.db.set_bot_token(store_id, token)?;
        let store = self
            .db
            .store(store_id)?
            .ok_or_else(|| AppError::NotFound(format!("store {}", store_id)))?;
        log::info!("Store {} linked a bot token", store_id);

        let outcome = Outcome::reply(event.chat_id(), messages::bot_linked(&store));
        if store.is_active {
            // A failed start is reported to the owner by the supervisor
            if let Err(e) = self.supervisor.restart(store_id).await {
                log::warn!("Store {} bot did not start after linking: {}", store_id, e);
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ConversationHandler for MotherHandler {
    fn scope(&self) -> BotScope {
        BotScope::Mother
    }

    async fn idle(&self, event: &InboundEvent) -> AppResult<Outcome> {
        if let Err(e) = self.db.upsert_user(event.sender()) {
            log::warn!("Could not record user {}: {}", event.user_id(), e);
        }

        if let Some((name, args)) = event.command() {
            return self.on_command(event, name, args).await;
        }
        if let Some(action) = event.action_id() {
            return self.on_action(event, action).await;
        }
        if event.message_text().is_some_and(|t| t.eq_ignore_ascii_case("register")) {
            return self.begin_registration(event);
        }
        self.show_menu(event).await
    }

    async fn complete(&self, event: &InboundEvent, completion: Completion) -> AppResult<Outcome> {
        match completion {
            Completion::CreateStore {
                name,
                description,
                plan,
            } => self.create_store(event, &name, &description, plan).await,
            Completion::SubmitPayment {
                store_id,
                plan,
                proof_file_id,
            } => self.submit_payment(event, store_id, plan, &proof_file_id).await,
            Completion::CreateProduct {
                store_id,
                name,
                description,
                price,
                image_file_id,
            } => {
                let created = self.db.create_product(&NewProduct {
                    store_id,
                    name: &name,
                    description: &description,
                    price,
                    image_file_id: image_file_id.as_deref(),
                })?;
                let reply = match created {
                    ProductCreation::Created(product) => messages::product_added(&product),
                    ProductCreation::LimitReached { limit } => messages::product_limit_reached(limit),
                };
                Ok(Outcome::reply(event.chat_id(), reply))
            }
            Completion::LinkBot { store_id, token } => self.link_bot(event, store_id, &token).await,
            Completion::PlaceOrder { .. } => Err(AppError::Validation(
                "orders are placed through a store bot".to_string(),
            )),
        }
    }

    fn prompt(&self, step: &FlowStep) -> Reply {
        messages::step_prompt(step, &self.settings.payment)
    }

    async fn main_menu(&self, event: &InboundEvent) -> Reply {
        let has_store = match self.owned_store(event) {
            Ok(store) => store.is_some(),
            Err(e) => {
                log::warn!("Could not look up store of {}: {}", event.user_id(), e);
                false
            }
        };
        self.menu_reply(event, has_store)
    }
}
