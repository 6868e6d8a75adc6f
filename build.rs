fn main() {
    // sqlx::migrate! 在编译期嵌入迁移文件
    println!("cargo:rerun-if-changed=migrations");
}
