use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agriconnect_catalog::{ProductId, StockPool, Unit};
use agriconnect_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use agriconnect_events::Event;

use crate::status::OrderStatus;

pub const MAX_NOTES_LEN: usize = 500;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Short human-facing reference (last 8 hex chars, upper-case).
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cod,
    Online,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::Online => "online",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

/// Recorded payment flag. Nothing in the engine settles payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub phone: String,
}

impl ShippingAddress {
    /// Every field is required and must not be blank.
    pub fn validate(&self) -> Result<(), DomainError> {
        let fields = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("pincode", &self.pincode),
            ("phone", &self.phone),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "shipping address {name} is required"
                )));
            }
        }
        Ok(())
    }
}

pub fn validate_notes(notes: Option<&str>) -> Result<(), DomainError> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(DomainError::validation(format!(
            "notes cannot exceed {MAX_NOTES_LEN} characters"
        ))),
        _ => Ok(()),
    }
}

/// Line-item snapshot. Name and price are copied from the product at the moment
/// its stock was reserved and never re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub farmer_id: UserId,
    pub quantity: u64,
    pub price_per_unit: u64,
    pub unit: Unit,
    pub stock_pool: StockPool,
    pub subtotal: u64,
}

impl OrderItem {
    /// Build a snapshot, computing `subtotal = price_per_unit * quantity`.
    pub fn snapshot(
        product_id: ProductId,
        product_name: impl Into<String>,
        farmer_id: UserId,
        price_per_unit: u64,
        unit: Unit,
        stock_pool: StockPool,
        quantity: u64,
    ) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        let subtotal = price_per_unit
            .checked_mul(quantity)
            .ok_or_else(|| DomainError::validation("line subtotal overflows"))?;

        Ok(Self {
            product_id,
            product_name: product_name.into(),
            farmer_id,
            quantity,
            price_per_unit,
            unit,
            stock_pool,
            subtotal,
        })
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    buyer_id: Option<UserId>,
    items: Vec<OrderItem>,
    total_amount: u64,
    shipping_address: Option<ShippingAddress>,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    status: OrderStatus,
    notes: Option<String>,
    placed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            buyer_id: None,
            items: Vec::new(),
            total_amount: 0,
            shipping_address: None,
            payment_method: PaymentMethod::default(),
            payment_status: PaymentStatus::default(),
            status: OrderStatus::Pending,
            notes: None,
            placed_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.buyer_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> u64 {
        self.total_amount
    }

    pub fn shipping_address(&self) -> Option<&ShippingAddress> {
        self.shipping_address.as_ref()
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Whether `farmer` sold at least one line of this order.
    pub fn involves_farmer(&self, farmer: UserId) -> bool {
        self.items.iter().any(|i| i.farmer_id == farmer)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. Items are snapshots taken after their stock was reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeStatus (a farmer on the order advances or cancels it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub order_id: OrderId,
    pub actor: UserId,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    ChangeStatus(ChangeStatus),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_amount: u64,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    StatusChanged(StatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::StatusChanged(_) => "orders.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.buyer_id = Some(e.buyer_id);
                self.items = e.items.clone();
                self.total_amount = e.total_amount;
                self.shipping_address = Some(e.shipping_address.clone());
                self.payment_method = e.payment_method;
                self.payment_status = PaymentStatus::Pending;
                self.status = OrderStatus::Pending;
                self.notes = e.notes.clone();
                self.placed_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.to;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::ChangeStatus(cmd) => self.handle_change_status(cmd),
        }
    }
}

impl Order {
    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("order must have at least one item"));
        }
        cmd.shipping_address.validate()?;
        validate_notes(cmd.notes.as_deref())?;

        let mut total: u64 = 0;
        for item in &cmd.items {
            if item.quantity == 0 {
                return Err(DomainError::validation("quantity must be at least 1"));
            }
            if item.price_per_unit.checked_mul(item.quantity) != Some(item.subtotal) {
                return Err(DomainError::invariant("line subtotal does not match price x quantity"));
            }
            total = total
                .checked_add(item.subtotal)
                .ok_or_else(|| DomainError::validation("order total overflows"))?;
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            buyer_id: cmd.buyer_id,
            items: cmd.items.clone(),
            total_amount: total,
            shipping_address: cmd.shipping_address.clone(),
            payment_method: cmd.payment_method,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_status(&self, cmd: &ChangeStatus) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != cmd.order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        if !self.involves_farmer(cmd.actor) {
            return Err(DomainError::Unauthorized);
        }
        if !self.status.can_transition_to(cmd.to) {
            return Err(DomainError::invalid_transition(self.status, cmd.to));
        }

        let buyer_id = self
            .buyer_id
            .ok_or_else(|| DomainError::invariant("placed order without buyer"))?;

        Ok(vec![OrderEvent::StatusChanged(StatusChanged {
            order_id: cmd.order_id,
            buyer_id,
            from: self.status,
            to: cmd.to,
            changed_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}
