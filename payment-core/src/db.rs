use sqlx::{MySqlPool, mysql::MySqlPoolOptions};

pub async fn create_pool(database_url: &str) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

// 初始化数据库表
pub async fn init_db(pool: &MySqlPool) -> anyhow::Result<()> {
    // 支付流水，payment_id 即提交给渠道的商户订单号
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_transactions (
            id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
            payment_id BIGINT UNSIGNED NOT NULL UNIQUE,
            order_id BIGINT UNSIGNED NOT NULL,
            user_id BIGINT UNSIGNED NOT NULL,
            amount BIGINT NOT NULL,
            currency VARCHAR(10) NOT NULL DEFAULT 'CNY',
            payment_method VARCHAR(32) NOT NULL,
            channel_code VARCHAR(64) NOT NULL,
            status VARCHAR(20) NOT NULL,
            gateway_transaction_id VARCHAR(128),
            gateway_response TEXT,
            created_at DATETIME(3) NOT NULL,
            updated_at DATETIME(3) NOT NULL,
            paid_at DATETIME(3) NULL,
            closed_at DATETIME(3) NULL,
            INDEX idx_order_id (order_id),
            INDEX idx_user_id (user_id),
            INDEX idx_status (status),
            INDEX idx_created_at (created_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 退款单
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refund_transactions (
            id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
            refund_id BIGINT UNSIGNED NOT NULL UNIQUE,
            original_payment_id BIGINT UNSIGNED NOT NULL,
            order_id BIGINT UNSIGNED NOT NULL,
            refund_amount BIGINT NOT NULL,
            status VARCHAR(20) NOT NULL,
            gateway_refund_id VARCHAR(128),
            reason VARCHAR(255),
            failure_reason VARCHAR(255),
            created_at DATETIME(3) NOT NULL,
            updated_at DATETIME(3) NOT NULL,
            completed_at DATETIME(3) NULL,
            INDEX idx_original_payment (original_payment_id),
            INDEX idx_created_at (created_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 订单状态通知任务，与支付流水状态变更同事务写入
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_tasks (
            id BIGINT UNSIGNED PRIMARY KEY,
            payment_id BIGINT UNSIGNED NOT NULL,
            order_id BIGINT UNSIGNED NOT NULL,
            target_status VARCHAR(20) NOT NULL,
            state VARCHAR(20) NOT NULL,
            attempts INT UNSIGNED NOT NULL DEFAULT 0,
            next_attempt_at DATETIME(3) NOT NULL,
            lease_until DATETIME(3) NULL,
            last_error TEXT,
            created_at DATETIME(3) NOT NULL,
            updated_at DATETIME(3) NOT NULL,
            INDEX idx_payment_id (payment_id),
            INDEX idx_due (state, next_attempt_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
