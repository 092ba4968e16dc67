fn main() {
    lbspeakerd_cmd::cmd::run();
}
