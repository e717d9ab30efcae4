//! Command Handler
//!
//! Turns one parsed RESP request into one RESP reply. A request must be a
//! non-empty array whose first element is a bulk string; those bytes,
//! uppercased as ASCII, name the command. Every argument must itself be a
//! bulk string.
//!
//! Handlers never touch the network. Misses (GET on an absent key, EXPIRE
//! on an absent key) are ordinary replies, not errors; error replies are
//! reserved for requests that are shaped wrong.

use crate::protocol::RespValue;
use crate::storage::ShardedMap;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// Executes commands against the shared [`ShardedMap`].
///
/// Cheap to clone; every connection task carries its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    map: Arc<ShardedMap>,
    /// Server start instant, reported by INFO.
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(map: Arc<ShardedMap>) -> Self {
        Self {
            map,
            start_time: Instant::now(),
        }
    }

    /// Executes one request and returns the reply to send.
    pub fn dispatch(&self, request: RespValue) -> RespValue {
        let args = match request {
            RespValue::Array(args) if !args.is_empty() => args,
            RespValue::Array(_) => return RespValue::error("ERR empty command"),
            _ => return RespValue::error("ERR command must be a non-empty array"),
        };

        let name = match &args[0] {
            RespValue::BulkString(raw) => match std::str::from_utf8(raw) {
                Ok(s) => s.to_ascii_uppercase(),
                Err(_) => return RespValue::error("ERR invalid command name"),
            },
            _ => return RespValue::error("ERR command name must be a bulk string"),
        };

        let args = &args[1..];
        match name.as_str() {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "TTL" => self.cmd_ttl(args),
            "EXPIRE" => self.cmd_expire(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHALL" => self.cmd_flushall(args),
            "KEYS" => self.cmd_keys(args),
            "INFO" => self.cmd_info(args),
            _ => RespValue::error(format!("ERR unknown command '{name}'")),
        }
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[RespValue]) -> RespValue {
        match args {
            [] => RespValue::pong(),
            [arg] => match bulk_arg(arg) {
                Some(message) => RespValue::BulkString(message),
                None => RespValue::error("ERR argument must be a bulk string"),
            },
            _ => wrong_args("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[RespValue]) -> RespValue {
        match args {
            [arg] => match bulk_arg(arg) {
                Some(message) => RespValue::BulkString(message),
                None => RespValue::error("ERR argument must be a bulk string"),
            },
            _ => wrong_args("ECHO"),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[RespValue]) -> RespValue {
        let [key] = args else {
            return wrong_args("GET");
        };
        let Some(key) = bulk_arg(key) else {
            return RespValue::error("ERR key must be a bulk string");
        };

        match self.map.get(&key) {
            Some(value) => RespValue::BulkString(value),
            None => RespValue::Null,
        }
    }

    /// SET key value [EX seconds]
    fn cmd_set(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 && args.len() != 4 {
            return wrong_args("SET");
        }

        let (Some(key), Some(value)) = (bulk_arg(&args[0]), bulk_arg(&args[1])) else {
            return RespValue::error("ERR key and value must be bulk strings");
        };

        let mut ttl_secs = 0u64;
        if args.len() == 4 {
            let option = match bulk_arg(&args[2]) {
                Some(opt) => opt,
                None => return RespValue::error("ERR syntax error"),
            };
            if !option.eq_ignore_ascii_case(b"EX") {
                return RespValue::error("ERR syntax error");
            }
            ttl_secs = match int_arg(&args[3]) {
                Some(seconds) if seconds >= 0 => seconds as u64,
                _ => return RespValue::error("ERR invalid expire time in 'SET' command"),
            };
        }

        self.map.set(key, value, ttl_secs);
        RespValue::ok()
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return wrong_args("DEL");
        }

        let mut removed = 0i64;
        for arg in args {
            let Some(key) = bulk_arg(arg) else {
                return RespValue::error("ERR key must be a bulk string");
            };
            if self.map.delete(&key) {
                removed += 1;
            }
        }
        RespValue::integer(removed)
    }

    /// EXISTS key [key ...]
    ///
    /// Counts every occurrence, so `EXISTS k k` replies 2 when `k` exists.
    fn cmd_exists(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return wrong_args("EXISTS");
        }

        let mut present = 0i64;
        for arg in args {
            let Some(key) = bulk_arg(arg) else {
                return RespValue::error("ERR key must be a bulk string");
            };
            if self.map.exists(&key) {
                present += 1;
            }
        }
        RespValue::integer(present)
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[RespValue]) -> RespValue {
        let [key] = args else {
            return wrong_args("TTL");
        };
        let Some(key) = bulk_arg(key) else {
            return RespValue::error("ERR key must be a bulk string");
        };

        RespValue::integer(self.map.ttl(&key))
    }

    /// EXPIRE key seconds
    fn cmd_expire(&self, args: &[RespValue]) -> RespValue {
        let [key, seconds] = args else {
            return wrong_args("EXPIRE");
        };
        let Some(key) = bulk_arg(key) else {
            return RespValue::error("ERR key must be a bulk string");
        };
        let ttl_secs = match int_arg(seconds) {
            Some(seconds) if seconds >= 0 => seconds as u64,
            _ => return RespValue::error("ERR invalid expire time in 'EXPIRE' command"),
        };

        let updated = self.map.expire(&key, ttl_secs);
        RespValue::integer(if updated { 1 } else { 0 })
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return wrong_args("DBSIZE");
        }
        RespValue::integer(self.map.len() as i64)
    }

    /// FLUSHALL
    fn cmd_flushall(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return wrong_args("FLUSHALL");
        }
        self.map.clear();
        RespValue::ok()
    }

    /// KEYS pattern
    ///
    /// Only the `*` pattern is supported.
    fn cmd_keys(&self, args: &[RespValue]) -> RespValue {
        let [pattern] = args else {
            return wrong_args("KEYS");
        };
        let Some(pattern) = bulk_arg(pattern) else {
            return RespValue::error("ERR pattern must be a bulk string");
        };
        if pattern.as_ref() != b"*" {
            return RespValue::error("ERR only the '*' pattern is supported");
        }

        let keys = self
            .map
            .keys()
            .into_iter()
            .map(RespValue::BulkString)
            .collect();
        RespValue::Array(keys)
    }

    /// INFO [section]
    fn cmd_info(&self, args: &[RespValue]) -> RespValue {
        let section = match args {
            [] => "all".to_string(),
            [arg] => {
                let Some(raw) = bulk_arg(arg) else {
                    return RespValue::error("ERR section must be a bulk string");
                };
                match std::str::from_utf8(&raw) {
                    Ok(s) => s.to_ascii_lowercase(),
                    Err(_) => return RespValue::error("ERR section must be a bulk string"),
                }
            }
            _ => return wrong_args("INFO"),
        };

        RespValue::bulk_string(Bytes::from(self.build_info(&section)))
    }

    fn build_info(&self, section: &str) -> String {
        let mut info = String::new();

        if section == "all" || section == "server" {
            info.push_str("# Server\r\n");
            info.push_str(&format!("tokenkv_version:{}\r\n", crate::VERSION));
            info.push_str("tokenkv_mode:standalone\r\n");
            info.push_str(&format!(
                "uptime_in_seconds:{}\r\n",
                self.start_time.elapsed().as_secs()
            ));
            info.push_str(&format!("shard_count:{}\r\n", self.map.shard_count()));
            info.push_str("\r\n");
        }

        if section == "all" || section == "memory" {
            info.push_str("# Memory\r\n");
            info.push_str(&format!("approx_used_bytes:{}\r\n", self.map.approx_bytes()));
            info.push_str("\r\n");
        }

        if section == "all" || section == "stats" {
            info.push_str("# Stats\r\n");
            info.push_str(&format!("total_keys:{}\r\n", self.map.len()));
            info.push_str("\r\n");
        }

        if section == "all" || section == "keyspace" {
            info.push_str("# Keyspace\r\n");
            info.push_str(&format!("db0:keys={}\r\n", self.map.len()));
            info.push_str("\r\n");
        }

        if info.is_empty() {
            info = format!("# {section} section not supported\r\n");
        }

        info
    }
}

/// Clones the payload out of a bulk-string argument.
fn bulk_arg(value: &RespValue) -> Option<Bytes> {
    match value {
        RespValue::BulkString(b) => Some(b.clone()),
        _ => None,
    }
}

/// Parses a bulk-string argument as a signed decimal.
fn int_arg(value: &RespValue) -> Option<i64> {
    match value {
        RespValue::BulkString(b) => std::str::from_utf8(b).ok()?.parse().ok(),
        _ => None,
    }
}

fn wrong_args(cmd: &str) -> RespValue {
    RespValue::error(format!("ERR wrong number of arguments for '{cmd}' command"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handler() -> CommandHandler {
        CommandHandler::new(Arc::new(ShardedMap::new()))
    }

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::Array(
            parts
                .iter()
                .map(|p| RespValue::bulk_string(Bytes::from(p.to_string())))
                .collect(),
        )
    }

    #[test]
    fn test_ping() {
        let h = handler();
        assert_eq!(h.dispatch(cmd(&["PING"])).serialize(), b"+PONG\r\n");
        assert_eq!(
            h.dispatch(cmd(&["PING", "hello"])).serialize(),
            b"$5\r\nhello\r\n"
        );
        assert!(h.dispatch(cmd(&["PING", "a", "b"])).is_error());
    }

    #[test]
    fn test_command_name_is_case_insensitive() {
        let h = handler();
        assert_eq!(h.dispatch(cmd(&["ping"])).serialize(), b"+PONG\r\n");
        assert_eq!(h.dispatch(cmd(&["PiNg"])).serialize(), b"+PONG\r\n");
    }

    #[test]
    fn test_echo() {
        let h = handler();
        assert_eq!(
            h.dispatch(cmd(&["ECHO", "hello"])).serialize(),
            b"$5\r\nhello\r\n"
        );
        assert!(h.dispatch(cmd(&["ECHO"])).is_error());
        assert!(h.dispatch(cmd(&["ECHO", "a", "b"])).is_error());
    }

    #[test]
    fn test_set_and_get() {
        let h = handler();
        assert_eq!(h.dispatch(cmd(&["SET", "x", "y"])).serialize(), b"+OK\r\n");
        assert_eq!(h.dispatch(cmd(&["GET", "x"])).serialize(), b"$1\r\ny\r\n");
    }

    #[test]
    fn test_get_missing_is_null() {
        let h = handler();
        assert_eq!(h.dispatch(cmd(&["GET", "missing"])).serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_set_with_expiry() {
        let h = handler();
        assert_eq!(
            h.dispatch(cmd(&["SET", "a", "b", "EX", "1"])).serialize(),
            b"+OK\r\n"
        );
        assert_eq!(h.dispatch(cmd(&["GET", "a"])).serialize(), b"$1\r\nb\r\n");

        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(h.dispatch(cmd(&["GET", "a"])).serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_set_ex_is_case_insensitive() {
        let h = handler();
        assert_eq!(
            h.dispatch(cmd(&["SET", "a", "b", "ex", "100"])).serialize(),
            b"+OK\r\n"
        );
        let ttl = h.dispatch(cmd(&["TTL", "a"]));
        assert!(matches!(ttl, RespValue::Integer(n) if n > 0 && n <= 100));
    }

    #[test]
    fn test_set_ex_zero_means_no_expiry() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "b", "EX", "0"]));
        assert_eq!(h.dispatch(cmd(&["TTL", "a"])).serialize(), b":-2\r\n");
    }

    #[test]
    fn test_set_rejects_bad_expiry() {
        let h = handler();
        assert!(h.dispatch(cmd(&["SET", "a", "b", "EX", "nope"])).is_error());
        assert!(h.dispatch(cmd(&["SET", "a", "b", "EX", "-5"])).is_error());
        assert!(h.dispatch(cmd(&["SET", "a", "b", "PX", "5"])).is_error());
        assert!(h.dispatch(cmd(&["SET", "a", "b", "EX"])).is_error());
        assert!(h.dispatch(cmd(&["SET", "a"])).is_error());
    }

    #[test]
    fn test_del_counts_removals() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "1"]));
        h.dispatch(cmd(&["SET", "b", "2"]));

        assert_eq!(
            h.dispatch(cmd(&["DEL", "a", "b", "c"])).serialize(),
            b":2\r\n"
        );
        // All gone now.
        assert_eq!(h.dispatch(cmd(&["DEL", "a", "b"])).serialize(), b":0\r\n");
        assert!(h.dispatch(cmd(&["DEL"])).is_error());
    }

    #[test]
    fn test_del_duplicate_key_counts_once() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "1"]));
        assert_eq!(h.dispatch(cmd(&["DEL", "a", "a"])).serialize(), b":1\r\n");
    }

    #[test]
    fn test_exists_counts_occurrences() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "1"]));

        assert_eq!(h.dispatch(cmd(&["EXISTS", "a"])).serialize(), b":1\r\n");
        assert_eq!(
            h.dispatch(cmd(&["EXISTS", "a", "a", "missing"])).serialize(),
            b":2\r\n"
        );
        assert!(h.dispatch(cmd(&["EXISTS"])).is_error());
    }

    #[test]
    fn test_ttl_replies() {
        let h = handler();
        assert_eq!(h.dispatch(cmd(&["TTL", "missing"])).serialize(), b":-1\r\n");

        h.dispatch(cmd(&["SET", "permanent", "v"]));
        assert_eq!(
            h.dispatch(cmd(&["TTL", "permanent"])).serialize(),
            b":-2\r\n"
        );

        h.dispatch(cmd(&["SET", "expiring", "v", "EX", "100"]));
        let ttl = h.dispatch(cmd(&["TTL", "expiring"]));
        assert!(matches!(ttl, RespValue::Integer(n) if n > 0 && n <= 100));
    }

    #[test]
    fn test_expire() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "v"]));

        assert_eq!(
            h.dispatch(cmd(&["EXPIRE", "a", "100"])).serialize(),
            b":1\r\n"
        );
        assert_eq!(
            h.dispatch(cmd(&["EXPIRE", "missing", "100"])).serialize(),
            b":0\r\n"
        );

        // EXPIRE key 0 clears the expiration.
        assert_eq!(h.dispatch(cmd(&["EXPIRE", "a", "0"])).serialize(), b":1\r\n");
        assert_eq!(h.dispatch(cmd(&["TTL", "a"])).serialize(), b":-2\r\n");

        assert!(h.dispatch(cmd(&["EXPIRE", "a", "-1"])).is_error());
        assert!(h.dispatch(cmd(&["EXPIRE", "a", "soon"])).is_error());
        assert!(h.dispatch(cmd(&["EXPIRE", "a"])).is_error());
    }

    #[test]
    fn test_dbsize_and_flushall() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "1"]));
        h.dispatch(cmd(&["SET", "b", "2"]));

        assert_eq!(h.dispatch(cmd(&["DBSIZE"])).serialize(), b":2\r\n");
        assert_eq!(h.dispatch(cmd(&["FLUSHALL"])).serialize(), b"+OK\r\n");
        assert_eq!(h.dispatch(cmd(&["DBSIZE"])).serialize(), b":0\r\n");
    }

    #[test]
    fn test_keys_star() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "1"]));
        h.dispatch(cmd(&["SET", "b", "2"]));

        let reply = h.dispatch(cmd(&["KEYS", "*"]));
        let RespValue::Array(keys) = reply else {
            panic!("expected array, got {reply:?}");
        };
        let mut names: Vec<_> = keys
            .iter()
            .map(|k| k.as_bytes().unwrap().to_vec())
            .collect();
        names.sort();
        assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec()]);

        assert!(h.dispatch(cmd(&["KEYS", "a*"])).is_error());
        assert!(h.dispatch(cmd(&["KEYS"])).is_error());
    }

    #[test]
    fn test_info_sections() {
        let h = handler();
        h.dispatch(cmd(&["SET", "a", "1"]));

        let RespValue::BulkString(body) = h.dispatch(cmd(&["INFO"])) else {
            panic!("expected bulk string");
        };
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("# Server"));
        assert!(text.contains("tokenkv_version:"));
        assert!(text.contains("# Memory"));
        assert!(text.contains("approx_used_bytes:"));
        assert!(text.contains("total_keys:1"));
        assert!(text.contains("db0:keys=1"));

        let RespValue::BulkString(body) = h.dispatch(cmd(&["INFO", "stats"])) else {
            panic!("expected bulk string");
        };
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("# Stats"));
        assert!(!text.contains("# Server"));

        let RespValue::BulkString(body) = h.dispatch(cmd(&["INFO", "memory"])) else {
            panic!("expected bulk string");
        };
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("# Memory"));
        assert!(!text.contains("section not supported"));
    }

    #[test]
    fn test_unknown_command() {
        let h = handler();
        let reply = h.dispatch(cmd(&["UNKNOWN"]));
        let RespValue::Error(message) = reply else {
            panic!("expected error");
        };
        assert!(message.starts_with("ERR"));
        assert!(message.contains("UNKNOWN"));
    }

    #[test]
    fn test_malformed_requests() {
        let h = handler();
        assert!(h.dispatch(RespValue::simple_string("PING")).is_error());
        assert!(h.dispatch(RespValue::Array(vec![])).is_error());
        assert!(h
            .dispatch(RespValue::Array(vec![RespValue::Integer(1)]))
            .is_error());
        // Arguments must be bulk strings too.
        assert!(h
            .dispatch(RespValue::Array(vec![
                RespValue::bulk_string(Bytes::from("GET")),
                RespValue::Integer(5),
            ]))
            .is_error());
    }
}
