fn main() {
    use build_script_cfg::Cfg;

    let cpu = Cfg::new("use_cpu");
    let cl = Cfg::new("use_cl");
    if cfg!(feature = "common-cpu") {
        cpu.define();
    }
    if cfg!(feature = "opencl") {
        cl.define();
    }
}
