#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PriceStatRow {
    pub source: String,
    pub pair: String,
    pub timestamp: i64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LatestDataRow {
    pub source: String,
    pub pair: String,
    pub price: f64,
    pub stored_time: i64,
}
