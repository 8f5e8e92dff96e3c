//! Lua text for every atomic operation the [`Backend`](distlock_core::Backend)
//! contract requires. Each constant is wrapped in a `redis::Script` once, at
//! first use, by the caller.

/// `SET key owner NX PX ttl`.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = owner
/// ARGV\[2\] = TTL in milliseconds
///
/// Returns 1 if acquired, 0 otherwise.
pub const SET_LOCK: &str = r"
local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
if ok then
    return 1
end
return 0
";

/// Conditional delete: `if GET(key)==owner then DEL(key)`.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = owner
///
/// Returns 1 if deleted, 0 if not held by this owner.
pub const REMOVE_LOCK: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";

/// Add `owner` to the set at `KEYS[1]`, rolling back if that would push
/// cardinality past `max_leases`; otherwise refresh a per-owner marker key
/// (`KEYS[2]`) and the set's own TTL.
///
/// KEYS\[1\] = semaphore set key
/// KEYS\[2\] = per-owner marker key
/// ARGV\[1\] = owner
/// ARGV\[2\] = max_leases
/// ARGV\[3\] = TTL in milliseconds
///
/// Returns 1 if the lease was granted, 0 otherwise.
pub const SET_SEMAPHORE_LOCK: &str = r"
redis.call('SADD', KEYS[1], ARGV[1])
local card = redis.call('SCARD', KEYS[1])
if card > tonumber(ARGV[2]) then
    redis.call('SREM', KEYS[1], ARGV[1])
    return 0
end
redis.call('SET', KEYS[2], ARGV[1], 'PX', ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
";

/// Remove `owner` from the set and delete its marker key.
///
/// KEYS\[1\] = semaphore set key
/// KEYS\[2\] = per-owner marker key
/// ARGV\[1\] = owner
pub const REMOVE_SEMAPHORE_LOCK: &str = r"
redis.call('SREM', KEYS[1], ARGV[1])
redis.call('DEL', KEYS[2])
return 1
";

/// Prune members of the set whose marker key (`{marker_prefix}:{owner}`) no
/// longer exists, meaning their holder crashed before releasing.
///
/// KEYS\[1\] = semaphore set key
/// ARGV\[1\] = marker key prefix
pub const CLEAN_UP_EXPIRED_SEMAPHORE_LOCKS: &str = r"
local members = redis.call('SMEMBERS', KEYS[1])
for _, owner in ipairs(members) do
    local marker = ARGV[1] .. ':' .. owner
    if redis.call('EXISTS', marker) == 0 then
        redis.call('SREM', KEYS[1], owner)
    end
end
return 1
";

/// `SADD latchKey token`; extend the key's TTL monotonically (never
/// shrinking it); publish `"open"` once cardinality reaches
/// `initial_count`.
///
/// KEYS\[1\] = latch key
/// ARGV\[1\] = token (`client_id ++ count`)
/// ARGV\[2\] = TTL in milliseconds
/// ARGV\[3\] = initial_count
/// ARGV\[4\] = channel name
pub const COUNT: &str = r"
redis.call('SADD', KEYS[1], ARGV[1])
local current_ttl = redis.call('PTTL', KEYS[1])
local requested_ttl = tonumber(ARGV[2])
if current_ttl == -1 or requested_ttl > current_ttl then
    redis.call('PEXPIRE', KEYS[1], requested_ttl)
end
local card = redis.call('SCARD', KEYS[1])
if card >= tonumber(ARGV[3]) then
    redis.call('PUBLISH', ARGV[4], 'open')
end
return 1
";

/// `SREM latchKey token`; returns the set's cardinality after removal.
///
/// KEYS\[1\] = latch key
/// ARGV\[1\] = token
pub const UNDO_COUNT: &str = r"
redis.call('SREM', KEYS[1], ARGV[1])
return redis.call('SCARD', KEYS[1])
";
