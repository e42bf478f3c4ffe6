use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agriconnect_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use agriconnect_events::Event;

use crate::pool::StockPool;

const MAX_NAME_LEN: usize = 150;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Selling unit of a listing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Kg,
    Quintal,
    Ton,
    Dozen,
    Piece,
    Liter,
    Bundle,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Kg => "kg",
            Unit::Quintal => "quintal",
            Unit::Ton => "ton",
            Unit::Dozen => "dozen",
            Unit::Piece => "piece",
            Unit::Liter => "liter",
            Unit::Bundle => "bundle",
        }
    }
}

impl core::fmt::Display for Unit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root: Product.
///
/// Both pools are unsigned; a reservation that would take a pool below zero is
/// rejected in `handle` and never reaches the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    farmer_id: Option<UserId>,
    name: String,
    price_per_unit: u64,
    unit: Unit,
    local_stock: u64,
    industrial_stock: u64,
    is_active: bool,
    listed_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-listed aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            farmer_id: None,
            name: String::new(),
            price_per_unit: 0,
            unit: Unit::Kg,
            local_stock: 0,
            industrial_stock: 0,
            is_active: false,
            listed_at: None,
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn farmer_id(&self) -> Option<UserId> {
        self.farmer_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price_per_unit(&self) -> u64 {
        self.price_per_unit
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn local_stock(&self) -> u64 {
        self.local_stock
    }

    pub fn industrial_stock(&self) -> u64 {
        self.industrial_stock
    }

    pub fn stock(&self, pool: StockPool) -> u64 {
        match pool {
            StockPool::Local => self.local_stock,
            StockPool::Industrial => self.industrial_stock,
        }
    }

    pub fn total_stock(&self) -> u64 {
        self.local_stock.saturating_add(self.industrial_stock)
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn listed_at(&self) -> Option<DateTime<Utc>> {
        self.listed_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn pool_mut(&mut self, pool: StockPool) -> &mut u64 {
        match pool {
            StockPool::Local => &mut self.local_stock,
            StockPool::Industrial => &mut self.industrial_stock,
        }
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ListProduct (a farmer puts a product on the marketplace).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListProduct {
    pub product_id: ProductId,
    pub farmer_id: UserId,
    pub name: String,
    pub price_per_unit: u64,
    pub unit: Unit,
    pub local_stock: u64,
    pub industrial_stock: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (decrement-if-sufficient on one pool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub pool: StockPool,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (return quantity to one pool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub product_id: ProductId,
    pub pool: StockPool,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AllocateStock (the owning farmer sets absolute pool levels).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateStock {
    pub product_id: ProductId,
    pub actor: UserId,
    pub local_stock: Option<u64>,
    pub industrial_stock: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReviseListing (the owning farmer edits listing details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseListing {
    pub product_id: ProductId,
    pub actor: UserId,
    pub name: Option<String>,
    pub price_per_unit: Option<u64>,
    pub unit: Option<Unit>,
    pub is_active: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    ListProduct(ListProduct),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    AllocateStock(AllocateStock),
    ReviseListing(ReviseListing),
}

/// Event: ProductListed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListed {
    pub product_id: ProductId,
    pub farmer_id: UserId,
    pub name: String,
    pub price_per_unit: u64,
    pub unit: Unit,
    pub local_stock: u64,
    pub industrial_stock: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub product_id: ProductId,
    pub pool: StockPool,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub product_id: ProductId,
    pub pool: StockPool,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAllocated. Carries the resulting absolute levels of both pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAllocated {
    pub product_id: ProductId,
    pub local_stock: u64,
    pub industrial_stock: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingRevised. Carries the full revised listing details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRevised {
    pub product_id: ProductId,
    pub name: String,
    pub price_per_unit: u64,
    pub unit: Unit,
    pub is_active: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductListed(ProductListed),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    StockAllocated(StockAllocated),
    ListingRevised(ListingRevised),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductListed(_) => "catalog.product.listed",
            ProductEvent::StockReserved(_) => "catalog.product.stock_reserved",
            ProductEvent::StockReleased(_) => "catalog.product.stock_released",
            ProductEvent::StockAllocated(_) => "catalog.product.stock_allocated",
            ProductEvent::ListingRevised(_) => "catalog.product.listing_revised",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductListed(e) => e.occurred_at,
            ProductEvent::StockReserved(e) => e.occurred_at,
            ProductEvent::StockReleased(e) => e.occurred_at,
            ProductEvent::StockAllocated(e) => e.occurred_at,
            ProductEvent::ListingRevised(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductListed(e) => {
                self.id = e.product_id;
                self.farmer_id = Some(e.farmer_id);
                self.name = e.name.clone();
                self.price_per_unit = e.price_per_unit;
                self.unit = e.unit;
                self.local_stock = e.local_stock;
                self.industrial_stock = e.industrial_stock;
                self.is_active = true;
                self.listed_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
                self.created = true;
            }
            ProductEvent::StockReserved(e) => {
                let pool = self.pool_mut(e.pool);
                *pool = pool.saturating_sub(e.quantity);
                self.updated_at = Some(e.occurred_at);
            }
            ProductEvent::StockReleased(e) => {
                let pool = self.pool_mut(e.pool);
                *pool = pool.saturating_add(e.quantity);
                self.updated_at = Some(e.occurred_at);
            }
            ProductEvent::StockAllocated(e) => {
                self.local_stock = e.local_stock;
                self.industrial_stock = e.industrial_stock;
                self.updated_at = Some(e.occurred_at);
            }
            ProductEvent::ListingRevised(e) => {
                self.name = e.name.clone();
                self.price_per_unit = e.price_per_unit;
                self.unit = e.unit;
                self.is_active = e.is_active;
                self.updated_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::ListProduct(cmd) => self.handle_list(cmd),
            ProductCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            ProductCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            ProductCommand::AllocateStock(cmd) => self.handle_allocate(cmd),
            ProductCommand::ReviseListing(cmd) => self.handle_revise(cmd),
        }
    }
}

fn validate_name(name: &str) -> Result<(), DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("product name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "product name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

impl Product {
    fn ensure_listed(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_owner(&self, actor: UserId) -> Result<(), DomainError> {
        if self.farmer_id != Some(actor) {
            return Err(DomainError::Unauthorized);
        }
        Ok(())
    }

    fn handle_list(&self, cmd: &ListProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already listed"));
        }
        validate_name(&cmd.name)?;

        Ok(vec![ProductEvent::ProductListed(ProductListed {
            product_id: cmd.product_id,
            farmer_id: cmd.farmer_id,
            name: cmd.name.trim().to_string(),
            price_per_unit: cmd.price_per_unit,
            unit: cmd.unit,
            local_stock: cmd.local_stock,
            industrial_stock: cmd.industrial_stock,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_listed(cmd.product_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }

        let available = self.stock(cmd.pool);
        if cmd.quantity > available {
            return Err(DomainError::InsufficientStock {
                product: self.name.clone(),
                pool: cmd.pool.to_string(),
                available,
                requested: cmd.quantity,
            });
        }

        Ok(vec![ProductEvent::StockReserved(StockReserved {
            product_id: cmd.product_id,
            pool: cmd.pool,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_listed(cmd.product_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be at least 1"));
        }
        if self.stock(cmd.pool).checked_add(cmd.quantity).is_none() {
            return Err(DomainError::invariant("stock counter overflow"));
        }

        Ok(vec![ProductEvent::StockReleased(StockReleased {
            product_id: cmd.product_id,
            pool: cmd.pool,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_allocate(&self, cmd: &AllocateStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_listed(cmd.product_id)?;
        self.ensure_owner(cmd.actor)?;

        if cmd.local_stock.is_none() && cmd.industrial_stock.is_none() {
            return Err(DomainError::validation(
                "at least one of localStock or industrialStock is required",
            ));
        }

        Ok(vec![ProductEvent::StockAllocated(StockAllocated {
            product_id: cmd.product_id,
            local_stock: cmd.local_stock.unwrap_or(self.local_stock),
            industrial_stock: cmd.industrial_stock.unwrap_or(self.industrial_stock),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revise(&self, cmd: &ReviseListing) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_listed(cmd.product_id)?;
        self.ensure_owner(cmd.actor)?;

        if cmd.name.is_none()
            && cmd.price_per_unit.is_none()
            && cmd.unit.is_none()
            && cmd.is_active.is_none()
        {
            return Err(DomainError::validation("nothing to revise"));
        }
        if let Some(name) = &cmd.name {
            validate_name(name)?;
        }

        Ok(vec![ProductEvent::ListingRevised(ListingRevised {
            product_id: cmd.product_id,
            name: cmd
                .name
                .as_deref()
                .map(str::trim)
                .unwrap_or(self.name.as_str())
                .to_string(),
            price_per_unit: cmd.price_per_unit.unwrap_or(self.price_per_unit),
            unit: cmd.unit.unwrap_or(self.unit),
            is_active: cmd.is_active.unwrap_or(self.is_active),
            occurred_at: cmd.occurred_at,
        })])
    }
}
