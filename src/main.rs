fn main() {
    build_readiness_lib::run()
}
