//! # olap-meta-engine 使用案例
//!
//! 1. 启动 StorageEngine
//! 2. 创建数据库与表
//! 3. CreateBlock → SetCount → CommitBlock
//! 4. 带表数据的 CreateBlock（嵌套物化物理 Block）
//! 5. 物理 Block 写入 object 文件并按 Extent 读回
//! 6. 关闭引擎
//!
//! 运行：`RUST_LOG=debug cargo run --example basic_usage`

use std::fs::File;
use std::io::BufWriter;

use olap_meta_engine::{
    common::ColumnType,
    compression::CompressionType,
    meta::ColumnSchema,
    objectio::{ObjectReader, ObjectWriter},
    table_data::MemTableData,
    Options, StorageEngine,
};
use tracing_subscriber::EnvFilter;

fn main() -> olap_meta_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // =========================================================================
    // 1. 启动 StorageEngine
    // =========================================================================
    println!("【1】启动 StorageEngine ...");
    let data_dir = std::env::temp_dir().join("olap-meta-demo");
    let engine = StorageEngine::open(
        Options::new(&data_dir).with_workers(4).with_block_max_rows(1024),
    )?;
    println!("    data_dir = {}\n", engine.options().data_dir.display());

    // =========================================================================
    // 2. 创建数据库与表
    // =========================================================================
    println!("【2】创建数据库 `ecommerce` 与表 `orders` ...");
    let db = engine.create_database("ecommerce")?;
    let schema = engine.schema("orders", vec![
        ColumnSchema::new(0, "order_id", ColumnType::Int64),
        ColumnSchema::new(1, "amount",   ColumnType::Float64),
        ColumnSchema::new(2, "status",   ColumnType::Varchar).nullable(),
    ]);
    let table = engine.create_table(db, schema)?;
    println!("    ✓ table_id = {}\n", table.id());

    // =========================================================================
    // 3. Block 生命周期
    // =========================================================================
    println!("【3】CreateBlock → SetCount → CommitBlock ...");
    let block = engine.create_block(table.id(), None)?;
    println!("    created: {:?} state={:?}", block.commit_info(), block.state());
    match engine.commit_block(&block) {
        Err(e) => println!("    未写满提交被拒绝: {e}"),
        Ok(_)  => println!("    !! 未写满也提交成功"),
    }
    block.set_count(1024)?;
    let snap = engine.commit_block(&block)?;
    println!("    committed: version={} prev={:?}", snap.version(), snap.commit.prev);
    for s in block.history() {
        println!("      v{} {} count={}", s.version(), s.op(), s.count);
    }
    println!();

    // =========================================================================
    // 4. 带表数据的 CreateBlock
    // =========================================================================
    println!("【4】CreateBlock + CreateSegmentData ...");
    let data = MemTableData::new(&table, 8);
    let ev = engine.create_block_with_data(table.id(), data)?;
    let physical = ev.physical_block().ok_or(
        olap_meta_engine::MetaError::EventOutputMissing(ev.id()),
    )?;
    println!(
        "    block_id={} segment_id={} columns={}\n",
        physical.block_id(), physical.segment_id(), physical.num_columns(),
    );

    // =========================================================================
    // 5. 写入 / 读取 object 文件
    // =========================================================================
    println!("【5】写入 object 文件 ...");
    for i in 0..4i64 {
        physical.append(0, &i.to_le_bytes())?;
        physical.append(1, &(i as f64 * 9.5).to_le_bytes())?;
        physical.append(2, b"paid")?;
    }
    let path = engine.object_path(table.id(), physical.segment_id());
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut writer = ObjectWriter::new(BufWriter::new(File::create(&path)?))?;
    let extent = physical.write_to(&mut writer, CompressionType::Lz4)?;
    writer.finish()?;
    println!("    {} extent={:?}", path.display(), extent);

    let reader = ObjectReader::open(&path)?;
    let cols = reader.read_columns(extent, &[0, 2])?;
    let ids: Vec<i64> = cols[0]
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    println!("    order_id = {ids:?}, status bytes = {}\n", cols[1].len());

    // =========================================================================
    // 6. 关闭
    // =========================================================================
    println!("【6】关闭引擎 ...");
    engine.shutdown();
    let rejected = engine.create_block(table.id(), None);
    println!("    关闭后提交: {:?}", rejected.err());
    Ok(())
}
