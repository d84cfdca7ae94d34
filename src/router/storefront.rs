//! A tenant's storefront: catalog browsing and checkout.

use async_trait::async_trait;
use chrono::Utc;

use crate::core::error::{AppError, AppResult};
use crate::core::types::{InboundEvent, StoreId};
use crate::flow::Completion;
use crate::router::{ConversationHandler, Effect, Outcome};
use crate::session::{BotScope, FlowStep};
use crate::storage::{Database, NewOrder, Product, Store};
use crate::telegram::messages::{self, Reply};

/// Orders shown by `/orders`.
const RECENT_ORDERS: u32 = 10;

pub struct StorefrontHandler {
    db: Database,
    store_id: StoreId,
}

/// Commission owed on an order, rounded down.
pub fn commission(amount: i64, percent: u8) -> i64 {
    amount.saturating_mul(i64::from(percent)) / 100
}

impl StorefrontHandler {
    pub fn new(db: Database, store_id: StoreId) -> Self {
        Self { db, store_id }
    }

    fn store(&self) -> AppResult<Store> {
        self.db
            .store(self.store_id)?
            .ok_or_else(|| AppError::NotFound(format!("store {}", self.store_id)))
    }

    /// A product of this store that can still be bought.
    fn sellable(&self, product_id: i64) -> AppResult<Option<Product>> {
        Ok(self
            .db
            .product(product_id)?
            .filter(|p| p.store_id == self.store_id && p.is_available))
    }

    fn catalog(&self, chat_id: i64) -> AppResult<Outcome> {
        let products: Vec<_> = self
            .db
            .products_for_store(self.store_id)?
            .into_iter()
            .filter(|p| p.is_available)
            .collect();
        Ok(Outcome::reply(chat_id, messages::catalog(&products)))
    }

    fn orders(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let orders = self
            .db
            .orders_for_customer(self.store_id, event.user_id(), RECENT_ORDERS)?;
        Ok(Outcome::reply(event.chat_id(), messages::customer_orders(&orders)))
    }

    fn product_detail(&self, chat_id: i64, product_id: i64) -> AppResult<Outcome> {
        let Some(product) = self.sellable(product_id)? else {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::PRODUCT_GONE)));
        };
        let detail = messages::product_detail(&product);
        let effect = match &product.image_file_id {
            Some(image) => Effect::photo(chat_id, image.clone(), detail),
            None => Effect::reply(chat_id, detail),
        };
        Ok(Outcome::default().with_effect(effect))
    }

    fn begin_checkout(&self, chat_id: i64, product_id: i64) -> AppResult<Outcome> {
        match self.sellable(product_id)? {
            Some(product) => Ok(Outcome::enter(FlowStep::CheckoutAwaitingPhone { product_id: product.id })),
            None => Ok(Outcome::reply(chat_id, Reply::text(messages::PRODUCT_GONE))),
        }
    }

    fn place_order(&self, event: &InboundEvent, product_id: i64, phone: &str, address: &str) -> AppResult<Outcome> {
        let chat_id = event.chat_id();
        let Some(product) = self.sellable(product_id)? else {
            return Ok(Outcome::reply(chat_id, Reply::text(messages::PRODUCT_GONE)));
        };
        let store = self.store()?;
        let customer_name = event.sender().display_name();
        let order = self.db.create_order(&NewOrder {
            store_id: self.store_id,
            product_id: product.id,
            customer_id: event.user_id(),
            customer_name: &customer_name,
            amount: product.price,
            commission: commission(product.price, store.commission_percent),
            phone,
            address,
        })?;
        log::info!("Store {} received order {}", self.store_id, order.id);

        Ok(Outcome::reply(chat_id, messages::order_placed(&order, &product))
            .with_effect(Effect::reply(store.owner_id, messages::new_order_for_owner(&order, &product))))
    }
}

fn id_after(action: &str, prefix: &str) -> Option<i64> {
    action.strip_prefix(prefix)?.parse().ok()
}

#[async_trait]
impl ConversationHandler for StorefrontHandler {
    fn scope(&self) -> BotScope {
        BotScope::Store(self.store_id)
    }

    /// Customers of a lapsed or deactivated store get a fixed reply.
    async fn preflight(&self, event: &InboundEvent) -> AppResult<Option<Vec<Effect>>> {
        let open = self
            .db
            .store(self.store_id)?
            .is_some_and(|store| store.is_active && !store.is_expired(Utc::now()));
        if open {
            return Ok(None);
        }
        Ok(Some(vec![Effect::reply(
            event.chat_id(),
            Reply::text(messages::STORE_UNAVAILABLE),
        )]))
    }

    async fn idle(&self, event: &InboundEvent) -> AppResult<Outcome> {
        let chat_id = event.chat_id();

        if let Some((name, _)) = event.command() {
            return match name {
                "products" => self.catalog(chat_id),
                "orders" => self.orders(event),
                "contact" => Ok(Outcome::reply(chat_id, messages::contact(&self.store()?))),
                _ => Ok(Outcome::reply(chat_id, messages::storefront_welcome(&self.store()?))),
            };
        }

        if let Some(action) = event.action_id() {
            match action {
                "show_products" => return self.catalog(chat_id),
                "my_orders" => return self.orders(event),
                "contact" => return Ok(Outcome::reply(chat_id, messages::contact(&self.store()?))),
                _ => {}
            }
            if let Some(id) = id_after(action, "confirm_buy_") {
                return self.begin_checkout(chat_id, id);
            }
            if let Some(id) = id_after(action, "buy_") {
                return self.product_detail(chat_id, id);
            }
        }

        // `/start`, `cancel_buy` and free text
        Ok(Outcome::reply(chat_id, messages::storefront_welcome(&self.store()?)))
    }

    async fn complete(&self, event: &InboundEvent, completion: Completion) -> AppResult<Outcome> {
        match completion {
            Completion::PlaceOrder {
                product_id,
                phone,
                address,
            } => self.place_order(event, product_id, &phone, &address),
            other => Err(AppError::Validation(format!(
                "{} is not available in a storefront",
                other.flow()
            ))),
        }
    }

    fn prompt(&self, step: &FlowStep) -> Reply {
        messages::checkout_prompt(step).unwrap_or_else(|| Reply::text(messages::GENERIC_FAILURE))
    }

    async fn main_menu(&self, _event: &InboundEvent) -> Reply {
        match self.store() {
            Ok(store) => messages::storefront_welcome(&store),
            Err(e) => {
                log::warn!("Could not load store {}: {}", self.store_id, e);
                Reply::text(messages::STORE_UNAVAILABLE)
            }
        }
    }
}
