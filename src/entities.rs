//! Entity descriptors: which fields each pipeline expects and how the
//! source files are laid out.

use crate::schema::FieldSpec;

/// How a source extract is stored on disk.
#[derive(Debug, Clone, Copy)]
pub struct SourceFormat {
    /// File extension without the dot.
    pub extension: &'static str,
    pub delimiter: u8,
}

/// Fields resolved by the Normalizer for a dimension-style entity.
#[derive(Debug, Clone, Copy)]
pub struct StagingSpec {
    pub entity: &'static str,
    pub fields: &'static [FieldSpec],
    /// Output names that together identify a staging row.
    pub business_key: &'static [&'static str],
}

/// Target layout of a type-1 current-state dimension.
#[derive(Debug, Clone, Copy)]
pub struct DimensionSpec {
    pub entity: &'static str,
    /// Primary key column.
    pub key: &'static str,
    /// Tracked, always-present identifier.
    pub secondary: &'static str,
    /// Tracked attributes that older extracts may lack.
    pub optional: &'static [&'static str],
}

impl DimensionSpec {
    pub fn required_columns(&self) -> [&'static str; 2] {
        [self.key, self.secondary]
    }
}

/// Shape of a daily fact rebuilt from a staging history.
#[derive(Debug, Clone, Copy)]
pub struct FactSpec {
    pub entity: &'static str,
    pub date: FieldSpec,
    pub secondary_key: FieldSpec,
    /// Columns carried into the fact when present, in output order.
    pub keep: &'static [&'static str],
    pub ratios: &'static [RatioSpec],
}

/// `numerator / denominator * scale`, added only when both operands exist.
#[derive(Debug, Clone, Copy)]
pub struct RatioSpec {
    pub name: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
    pub scale: f64,
}

pub const CATALOG_LISTINGS_SOURCE: SourceFormat = SourceFormat {
    extension: "txt",
    delimiter: b'\t',
};

pub const CATALOG_LISTINGS: StagingSpec = StagingSpec {
    entity: "catalog_listings",
    fields: &[
        FieldSpec::required(
            "SKU",
            "seller_sku",
            &["seller_sku", "seller-sku", "sku", "merchant_sku", "merchant-sku"],
        ),
        FieldSpec::required("ASIN", "asin", &["asin1", "asin", "asin-1", "asin_1"]),
        FieldSpec::optional(
            "item name",
            "item_name",
            &["item_name", "item-name", "product_name", "title"],
        ),
        FieldSpec::optional("status", "status", &["status", "listing_status"]),
        FieldSpec::optional(
            "fulfillment channel",
            "fulfillment_channel",
            &["fulfillment_channel", "fulfillment-channel", "fulfillment"],
        ),
    ],
    business_key: &["seller_sku", "asin"],
};

pub const SKU_ASIN_DIMENSION: DimensionSpec = DimensionSpec {
    entity: "sku_asin_current",
    key: "seller_sku",
    secondary: "asin",
    optional: &["item_name", "fulfillment_channel", "status"],
};

pub const SALES_TRAFFIC_CHILD_ASIN_DAILY: FactSpec = FactSpec {
    entity: "sales_traffic_child_asin_daily",
    date: FieldSpec::required("date", "date", &["date"]),
    secondary_key: FieldSpec::required("child ASIN", "child_asin", &["child_asin", "asin", "asin1"]),
    keep: &[
        "date",
        "child_asin",
        "parent_asin",
        "sessions_total",
        "page_views_total",
        "units_ordered",
        "total_order_items",
        "ordered_product_sales_usd",
        "unit_session_percentage",
        "load_id",
        "load_ts",
        "source_file",
    ],
    ratios: &[
        RatioSpec {
            name: "revenue_per_session_usd",
            numerator: "ordered_product_sales_usd",
            denominator: "sessions_total",
            scale: 1.0,
        },
        RatioSpec {
            name: "conversion_rate_pct_calc",
            numerator: "units_ordered",
            denominator: "sessions_total",
            scale: 100.0,
        },
    ],
};
