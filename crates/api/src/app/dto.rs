//! Request/response bodies. JSON field names are camelCase on the wire.

use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use agriconnect_catalog::{ProductId, Unit};
use agriconnect_infra::projections::{OrderReadModel, ProductReadModel};
use agriconnect_infra::services::{
    CheckoutRequest, LineRequest, ListingRevision, NewListing, StockLevels,
};
use agriconnect_orders::{OrderItem, PaymentMethod, ShippingAddress};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

/// Blank or missing fields are reported by address validation, not the parser.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShippingAddressRequest {
    pub street: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    pub shipping_address: Option<ShippingAddressRequest>,
    pub payment_method: Option<PaymentMethod>,
    pub notes: Option<String>,
}

impl PlaceOrderRequest {
    pub fn into_checkout(self) -> Result<CheckoutRequest, Response> {
        let items = self
            .items
            .into_iter()
            .map(|line| {
                Ok(LineRequest {
                    product_id: ProductId::new(errors::parse_id(&line.product_id)?),
                    quantity: line.quantity,
                })
            })
            .collect::<Result<Vec<_>, Response>>()?;

        Ok(CheckoutRequest {
            items,
            shipping_address: self.shipping_address.map(|a| ShippingAddress {
                street: a.street,
                city: a.city,
                state: a.state,
                pincode: a.pincode,
                phone: a.phone,
            }),
            payment_method: self.payment_method,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    pub price_per_unit: u64,
    pub unit: Unit,
    #[serde(default)]
    pub local_stock: u64,
    #[serde(default)]
    pub industrial_stock: u64,
}

impl From<CreateProductRequest> for NewListing {
    fn from(body: CreateProductRequest) -> Self {
        NewListing {
            name: body.name,
            price_per_unit: body.price_per_unit,
            unit: body.unit,
            local_stock: body.local_stock,
            industrial_stock: body.industrial_stock,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStockRequest {
    pub local_stock: Option<u64>,
    pub industrial_stock: Option<u64>,
}

impl From<UpdateStockRequest> for StockLevels {
    fn from(body: UpdateStockRequest) -> Self {
        StockLevels {
            local_stock: body.local_stock,
            industrial_stock: body.industrial_stock,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviseProductRequest {
    pub name: Option<String>,
    pub price_per_unit: Option<u64>,
    pub unit: Option<Unit>,
    pub is_active: Option<bool>,
}

impl From<ReviseProductRequest> for ListingRevision {
    fn from(body: ReviseProductRequest) -> Self {
        ListingRevision {
            name: body.name,
            price_per_unit: body.price_per_unit,
            unit: body.unit,
            is_active: body.is_active,
        }
    }
}

// -------------------------
// Response mapping
// -------------------------

fn item_to_json(item: OrderItem) -> JsonValue {
    json!({
        "productId": item.product_id.0.to_string(),
        "productName": item.product_name,
        "farmerId": item.farmer_id.to_string(),
        "quantity": item.quantity,
        "pricePerUnit": item.price_per_unit,
        "unit": item.unit,
        "stockPool": item.stock_pool,
        "subtotal": item.subtotal,
    })
}

pub fn order_to_json(rm: OrderReadModel) -> JsonValue {
    json!({
        "id": rm.order_id.to_string(),
        "buyerId": rm.buyer_id.to_string(),
        "items": rm.items.into_iter().map(item_to_json).collect::<Vec<_>>(),
        "totalAmount": rm.total_amount,
        "shippingAddress": rm.shipping_address,
        "paymentMethod": rm.payment_method.as_str(),
        "paymentStatus": rm.payment_status,
        "status": rm.status.as_str(),
        "notes": rm.notes,
        "createdAt": rm.created_at.to_rfc3339(),
        "updatedAt": rm.updated_at.to_rfc3339(),
    })
}

pub fn product_to_json(rm: ProductReadModel) -> JsonValue {
    json!({
        "id": rm.product_id.0.to_string(),
        "farmerId": rm.farmer_id.to_string(),
        "name": rm.name,
        "pricePerUnit": rm.price_per_unit,
        "unit": rm.unit,
        "localStock": rm.local_stock,
        "industrialStock": rm.industrial_stock,
        "totalStock": rm.total_stock(),
        "isActive": rm.is_active,
        "createdAt": rm.created_at.to_rfc3339(),
        "updatedAt": rm.updated_at.to_rfc3339(),
    })
}
