use redis::RedisResult;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns true while `key` is within `limit` for the window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (count,): (i64,) = fixed_window(key, window_seconds).query_async(&mut conn).await?;
        Ok(count <= limit)
    }
}

/// INCR, then start the window only if the key has no TTL yet (`EXPIRE NX`, Redis 7+).
fn fixed_window(key: &str, window_seconds: i64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .incr(key, 1)
        .cmd("EXPIRE")
        .arg(key)
        .arg(window_seconds)
        .arg("NX")
        .ignore();
    pipe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_expiry_is_only_set_once() {
        let packed = fixed_window("rl:user-1", 60).get_packed_pipeline();
        let text = String::from_utf8(packed).unwrap();

        assert!(text.contains("INCR"));
        assert!(text.contains("EXPIRE\r\n$9\r\nrl:user-1\r\n$2\r\n60\r\n$2\r\nNX"));
    }

    #[tokio::test]
    #[ignore = "needs a Redis 7 server at REDIS_URL"]
    async fn test_window_does_not_slide_under_traffic() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let client = RedisClient::new(&url).await.unwrap();
        let key = format!("rl:test:{}", uuid::Uuid::new_v4());

        assert!(client.check_rate_limit(&key, 2, 2).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        assert!(client.check_rate_limit(&key, 2, 2).await.unwrap());
        assert!(!client.check_rate_limit(&key, 2, 2).await.unwrap());

        // The window opened by the first request has closed
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
        assert!(client.check_rate_limit(&key, 2, 2).await.unwrap());
    }
}
