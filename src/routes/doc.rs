use utoipa::{
    Modify, OpenApi,
    openapi::{
        self, OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    domain::{CartStatus, FulfillmentStatus, OrderStatus, PaymentRecordStatus, PaymentStatus},
    dto::{
        admin::{
            BulkActionResult, BulkOrderRequest, InventoryAdjustRequest, LowStockList,
            OrderBulkAction, RefundRequest, RefundResult, UpdateOrderStatusRequest,
        },
        cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
        checkout::{AddressSnapshot, CheckoutRequest, CheckoutResponse},
        orders::{OrderList, OrderWithItems, PaymentConfirmation},
        products::{
            BulkProductRequest, CreateProductRequest, ProductBulkAction, ProductList,
            UpdateProductRequest,
        },
    },
    models::{Order, OrderItem, Payment, Product},
    pricing::CartTotals,
    response::{ApiResponse, Meta},
    routes::{
        admin, cart, checkout, health, orders, products as product_routes, webhooks,
        webhooks::WebhookAck,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        product_routes::list_products,
        product_routes::get_product,
        cart::view_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        checkout::checkout,
        orders::list_orders,
        orders::get_order,
        orders::confirm_payment,
        webhooks::payment_webhook,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::bulk_update_orders,
        admin::refund_order,
        admin::list_low_stock,
        admin::adjust_inventory,
        admin::create_product,
        admin::update_product,
        admin::bulk_products
    ),
    components(
        schemas(
            CartStatus,
            OrderStatus,
            PaymentStatus,
            FulfillmentStatus,
            PaymentRecordStatus,
            Product,
            Order,
            OrderItem,
            Payment,
            CartTotals,
            CartItemDto,
            CartView,
            AddToCartRequest,
            UpdateCartItemRequest,
            AddressSnapshot,
            CheckoutRequest,
            CheckoutResponse,
            OrderList,
            OrderWithItems,
            PaymentConfirmation,
            UpdateOrderStatusRequest,
            OrderBulkAction,
            BulkOrderRequest,
            BulkActionResult,
            RefundRequest,
            RefundResult,
            InventoryAdjustRequest,
            LowStockList,
            CreateProductRequest,
            UpdateProductRequest,
            ProductBulkAction,
            BulkProductRequest,
            ProductList,
            WebhookAck,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<CheckoutResponse>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product catalogue"),
        (name = "Cart", description = "Cart for signed-in users and guest sessions"),
        (name = "Checkout", description = "Turn the cart into an order"),
        (name = "Orders", description = "Orders of the current user"),
        (name = "Webhooks", description = "Payment gateway callbacks"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
