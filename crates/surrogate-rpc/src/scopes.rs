//! Demonstration scopes hosted by `surrogate-rpc serve`.

use serde_json::{json, Value};
use std::time::Duration;
use surrogate_core::{arg, Channel, Exception, LacoMethods, Methods, Result};

/// `echo`: NORMAL scope returning its input.
pub fn echo() -> Methods {
    Methods::new()
        .with("echo", |args| Ok(args.into_iter().next().unwrap_or(Value::Null)))
        .with("reverse", |args| {
            let text: String = arg(&args, 0)?;
            Ok(json!(text.chars().rev().collect::<String>()))
        })
}

/// `math`: NORMAL scope with a failing division.
pub fn math() -> Methods {
    Methods::new()
        .with("add", |args| {
            let a: f64 = arg(&args, 0)?;
            let b: f64 = arg(&args, 1)?;
            Ok(json!(a + b))
        })
        .with("div", |args| {
            let a: f64 = arg(&args, 0)?;
            let b: f64 = arg(&args, 1)?;
            if b == 0.0 {
                return Err(Exception::error("div0"));
            }
            Ok(json!(a / b))
        })
}

/// `timer`: LACO scope replying after a delay.
///
/// `delay(ms, value)` answers with `value` once `ms` milliseconds passed.
pub fn timer() -> LacoMethods {
    LacoMethods::new().with("delay", |args, completion| {
        let ms: u64 = match arg(&args, 0) {
            Ok(ms) => ms,
            Err(e) => return completion.errback(e),
        };
        let value = args.get(1).cloned().unwrap_or(Value::Null);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            completion.callback(value);
        });
    })
}

/// Supply every demonstration scope on `channel`.
pub fn supply_all(channel: &Channel) -> Result<()> {
    channel.supply("echo", echo())?;
    channel.supply("math", math())?;
    channel.supply_laco_async("timer", timer())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surrogate_core::{create_pipe, CallError, ChannelConfig, Pipe};

    fn host() -> (Channel, Channel, Pipe) {
        let pipe = create_pipe();
        let client = Channel::new(pipe.left.clone(), ChannelConfig::new("client")).unwrap();
        let server = Channel::new(pipe.right.clone(), ChannelConfig::new("server")).unwrap();
        supply_all(&server).unwrap();
        (client, server, pipe)
    }

    #[tokio::test]
    async fn test_echo_and_reverse() {
        let (client, _server, _pipe) = host();

        let echoed = client
            .invoke("echo", "echo", vec![json!({"k": [1, 2]})])
            .await
            .unwrap();
        assert_eq!(echoed, json!({"k": [1, 2]}));

        let reversed = client
            .invoke("echo", "reverse", vec![json!("surrogate")])
            .await
            .unwrap();
        assert_eq!(reversed, json!("etagorrus"));
    }

    #[tokio::test]
    async fn test_math_div_by_zero() {
        let (client, _server, _pipe) = host();

        let sum = client.invoke("math", "add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(sum.as_f64(), Some(5.0));

        match client.invoke("math", "div", vec![json!(1), json!(0)]).await {
            Err(CallError::Remote(e)) => assert_eq!(e.message, "div0"),
            other => panic!("Expected div0, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_delay_replies_with_value() {
        let (client, _server, _pipe) = host();

        let started = tokio::time::Instant::now();
        let reply = client
            .invoke("timer", "delay", vec![json!(1500), json!("done")])
            .await
            .unwrap();
        assert_eq!(reply, json!("done"));
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_timer_rejects_bad_delay() {
        let (client, _server, _pipe) = host();

        let err = client
            .invoke("timer", "delay", vec![json!("soon")])
            .await
            .unwrap_err();
        assert_eq!(err.exception().map(|e| e.name.as_str()), Some("TypeError"));
    }
}
