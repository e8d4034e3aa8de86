//! Table definitions for the single relational file.
//!
//! Creation order respects foreign-key dependencies: sources before hosts,
//! hosts before relations and scan cache.  `host_deletions` is deliberately
//! not FK-linked so audit rows survive the host they describe.

use sqlx::SqlitePool;

use crate::error::StoreResult;

const STATEMENTS: &[&str] = &[
    // Inventory sources
    "CREATE TABLE IF NOT EXISTS inventory_sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        source_type TEXT NOT NULL,
        file_path TEXT,
        import_method TEXT DEFAULT 'manual',
        host_count INTEGER DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        metadata TEXT
    )",
    // Hosts
    "CREATE TABLE IF NOT EXISTS hosts_v2 (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hostname TEXT NOT NULL UNIQUE,
        ip_address TEXT,
        aliases TEXT,
        environment TEXT,
        groups TEXT,
        role TEXT,
        service TEXT,
        ssh_port INTEGER DEFAULT 22,
        status TEXT DEFAULT 'unknown',
        source_id INTEGER,
        metadata TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (source_id) REFERENCES inventory_sources(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_hosts_v2_hostname ON hosts_v2(hostname)",
    "CREATE INDEX IF NOT EXISTS idx_hosts_v2_environment ON hosts_v2(environment)",
    "CREATE INDEX IF NOT EXISTS idx_hosts_v2_source ON hosts_v2(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_hosts_v2_groups ON hosts_v2(groups)",
    "CREATE INDEX IF NOT EXISTS idx_hosts_v2_aliases ON hosts_v2(aliases)",
    "CREATE INDEX IF NOT EXISTS idx_hosts_v2_status ON hosts_v2(status)",
    // Host versions
    "CREATE TABLE IF NOT EXISTS host_versions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        changes TEXT NOT NULL,
        changed_by TEXT DEFAULT 'system',
        created_at TEXT NOT NULL,
        FOREIGN KEY (host_id) REFERENCES hosts_v2(id) ON DELETE CASCADE,
        UNIQUE(host_id, version)
    )",
    "CREATE INDEX IF NOT EXISTS idx_host_versions_host ON host_versions(host_id, version)",
    // Deletion audit (no FK: survives the host)
    "CREATE TABLE IF NOT EXISTS host_deletions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id INTEGER NOT NULL,
        hostname TEXT NOT NULL,
        ip_address TEXT,
        aliases TEXT,
        environment TEXT,
        groups TEXT,
        role TEXT,
        service TEXT,
        ssh_port INTEGER,
        status TEXT,
        metadata TEXT,
        deleted_by TEXT NOT NULL,
        deletion_reason TEXT,
        deleted_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_host_deletions_hostname ON host_deletions(hostname)",
    "CREATE INDEX IF NOT EXISTS idx_host_deletions_deleted_at ON host_deletions(deleted_at)",
    // Relations
    "CREATE TABLE IF NOT EXISTS host_relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_host_id INTEGER NOT NULL,
        target_host_id INTEGER NOT NULL,
        relation_type TEXT NOT NULL,
        confidence REAL DEFAULT 1.0,
        validated_by_user INTEGER DEFAULT 0,
        metadata TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        FOREIGN KEY (source_host_id) REFERENCES hosts_v2(id) ON DELETE CASCADE,
        FOREIGN KEY (target_host_id) REFERENCES hosts_v2(id) ON DELETE CASCADE,
        UNIQUE(source_host_id, target_host_id, relation_type)
    )",
    "CREATE INDEX IF NOT EXISTS idx_relations_source ON host_relations(source_host_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_target ON host_relations(target_host_id)",
    // Scan cache
    "CREATE TABLE IF NOT EXISTS scan_cache (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host_id INTEGER NOT NULL,
        scan_type TEXT NOT NULL,
        data TEXT NOT NULL,
        ttl_seconds INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        FOREIGN KEY (host_id) REFERENCES hosts_v2(id) ON DELETE CASCADE,
        UNIQUE(host_id, scan_type)
    )",
    "CREATE INDEX IF NOT EXISTS idx_scan_cache_host ON scan_cache(host_id, scan_type)",
    "CREATE INDEX IF NOT EXISTS idx_scan_cache_expires ON scan_cache(expires_at)",
    // Local machine context
    "CREATE TABLE IF NOT EXISTS local_context (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(category, key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_local_context_category ON local_context(category)",
    // Snapshots
    "CREATE TABLE IF NOT EXISTS inventory_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT,
        description TEXT,
        host_count INTEGER,
        snapshot_data TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    // Session audit trail
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        status TEXT DEFAULT 'active',
        total_queries INTEGER DEFAULT 0,
        total_actions INTEGER DEFAULT 0,
        metadata TEXT
    )",
    "CREATE TABLE IF NOT EXISTS queries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        query TEXT NOT NULL,
        response TEXT,
        response_type TEXT,
        actions_count INTEGER DEFAULT 0,
        execution_time_ms INTEGER,
        FOREIGN KEY (session_id) REFERENCES sessions(id)
    )",
    "CREATE TABLE IF NOT EXISTS actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query_id INTEGER NOT NULL,
        session_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        target TEXT NOT NULL,
        command TEXT NOT NULL,
        exit_code INTEGER,
        stdout TEXT,
        stderr TEXT,
        risk_level TEXT,
        duration_ms INTEGER,
        FOREIGN KEY (query_id) REFERENCES queries(id),
        FOREIGN KEY (session_id) REFERENCES sessions(id)
    )",
    "CREATE TABLE IF NOT EXISTS context_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        context_data TEXT NOT NULL,
        snapshot_type TEXT DEFAULT 'auto',
        FOREIGN KEY (session_id) REFERENCES sessions(id)
    )",
    // Conversations
    "CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        token_count INTEGER DEFAULT 0,
        compacted INTEGER DEFAULT 0,
        is_current INTEGER DEFAULT 0,
        metadata TEXT
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        tokens INTEGER DEFAULT 0,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, timestamp)",
];

pub(crate) async fn init(pool: &SqlitePool) -> StoreResult<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
